//! Infrastructure layer for database access, HTTP fetching, and site parsing
//!
//! Provides the SQLite connection and repositories, the rate-limited HTTP
//! client with its headless-render fallback, the supplier site adapter,
//! configuration loading, and logging setup.

pub mod config;
pub mod database_connection;
pub mod headless;
pub mod http_client;
pub mod logging;
pub mod repositories;
pub mod site_adapter;

// Re-export commonly used items
pub use config::{AppConfig, ConfigManager};
pub use database_connection::DatabaseConnection;
pub use http_client::{FetchError, HttpClient, PageFetcher, SupplierFetcher};
pub use repositories::{
    CanonicalStore, DiffRepository, LogRepository, RunRepository, SourceRepository,
    SqliteCanonicalStore, StagedRepository, TemplateRepository,
};
pub use site_adapter::{SelectorSiteAdapter, SiteAdapter, SiteAdapterConfig};
