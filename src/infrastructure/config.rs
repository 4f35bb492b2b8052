//! Configuration infrastructure
//!
//! Loads and manages the application configuration for supplier crawling.
//! Configuration lives in a JSON file under the user config directory and
//! is initialized with defaults on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawling behavior (timeouts, budgets, politeness)
    pub crawling: CrawlingConfig,

    /// Guard windows for the run orchestrator
    pub guards: GuardConfig,

    /// Progress/log stream cadence and caps
    pub stream: StreamConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Database location
    pub database: DatabaseConfig,
}

/// Crawling specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlingConfig {
    /// Maximum listing pages to walk in one discovery session
    pub max_pages: u32,

    /// Query parameter used by the page-number pagination heuristic
    pub page_param: String,

    /// Request timeout in seconds for static fetches
    pub request_timeout_seconds: u64,

    /// Timeout in seconds for the headless render fallback
    pub render_timeout_seconds: u64,

    /// Maximum requests per second against a supplier site
    pub max_requests_per_second: u32,

    /// Retry attempts for product detail pages
    pub detail_retry_count: u32,

    /// Base delay between detail retries in milliseconds (jittered)
    pub retry_delay_ms: u64,

    /// User agent string sent with every request
    pub user_agent: String,

    /// Rough per-candidate seconds used for the prepare ETA estimate
    pub eta_seconds_per_item: f64,
}

impl Default for CrawlingConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::MAX_PAGES,
            page_param: defaults::PAGE_PARAM.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            render_timeout_seconds: defaults::RENDER_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            detail_retry_count: defaults::DETAIL_RETRY_COUNT,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            user_agent: defaults::USER_AGENT.to_string(),
            eta_seconds_per_item: defaults::ETA_SECONDS_PER_ITEM,
        }
    }
}

/// Mutual-exclusion and rate-limit windows for recrawl/purge requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Cooldown between recrawl starts for one template, in seconds
    pub recrawl_cooldown_seconds: u64,

    /// Trailing window in which a publish log entry blocks recrawl
    pub publish_window_seconds: u64,

    /// Purge staging budget per supplier per minute
    pub purge_max_per_minute: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            recrawl_cooldown_seconds: defaults::RECRAWL_COOLDOWN_SECONDS,
            publish_window_seconds: defaults::PUBLISH_WINDOW_SECONDS,
            purge_max_per_minute: defaults::PURGE_MAX_PER_MINUTE,
        }
    }
}

/// Progress/log stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Snapshot tick interval in milliseconds
    pub tick_ms: u64,

    /// Emit a ping after this many silent ticks
    pub ping_every_ticks: u32,

    /// A non-terminal run older than this is reported stuck
    pub stuck_after_seconds: i64,

    /// Connection cap per caller class
    pub max_connections_per_class: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tick_ms: defaults::STREAM_TICK_MS,
            ping_every_ticks: defaults::STREAM_PING_EVERY_TICKS,
            stuck_after_seconds: defaults::STREAM_STUCK_AFTER_SECONDS,
            max_connections_per_class: defaults::STREAM_MAX_CONNECTIONS_PER_CLASS,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to also write a rolling log file
    pub file_enabled: bool,

    /// Log directory; relative paths resolve against the working directory
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: true,
            directory: "logs".to_string(),
        }
    }
}

/// Database location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://rodsync.db`
    pub url: String,

    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rodsync.db".to_string(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            crawling: CrawlingConfig::default(),
            guards: GuardConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Manages the configuration file lifecycle.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory.
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("rodsync");
        Ok(config_dir)
    }

    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        let config_path = config_dir.join("rodsync_config.json");
        Ok(Self { config_path })
    }

    /// Use an explicit path instead of the user config directory.
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Load the configuration, writing defaults on first run.
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        let config_dir = self
            .config_path
            .parent()
            .context("Failed to get config directory")?;

        if !config_dir.exists() {
            fs::create_dir_all(config_dir)
                .await
                .context("Failed to create config directory")?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !self.config_path.exists() {
            info!("First run detected - initializing default configuration");
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            Ok(default_config)
        } else {
            self.load_config().await
        }
    }

    pub async fn load_config(&self) -> Result<AppConfig> {
        let contents = fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", self.config_path))?;
        let config: AppConfig =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.config_path, contents)
            .await
            .with_context(|| format!("Failed to write config file {:?}", self.config_path))?;
        Ok(())
    }
}

/// Default configuration values.
pub mod defaults {
    /// Default maximum listing pages per discovery session
    pub const MAX_PAGES: u32 = 50;

    /// Default pagination query parameter
    pub const PAGE_PARAM: &str = "page";

    /// Default request timeout in seconds; supplier sites that hang must
    /// not stall the pipeline
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 8;

    /// Default headless render timeout in seconds
    pub const RENDER_TIMEOUT_SECONDS: u64 = 9;

    /// Default maximum requests per second
    pub const MAX_REQUESTS_PER_SECOND: u32 = 5;

    /// Default retry attempts for product detail pages
    pub const DETAIL_RETRY_COUNT: u32 = 3;

    /// Default retry delay in milliseconds
    pub const RETRY_DELAY_MS: u64 = 750;

    /// Default user agent
    pub const USER_AGENT: &str = "rodsync/0.3 (catalog import; +https://rodsync.example)";

    /// Default per-candidate ETA estimate in seconds
    pub const ETA_SECONDS_PER_ITEM: f64 = 1.5;

    /// Default recrawl cooldown in seconds
    pub const RECRAWL_COOLDOWN_SECONDS: u64 = 120;

    /// Default trailing publish guard window in seconds
    pub const PUBLISH_WINDOW_SECONDS: u64 = 600;

    /// Default purge budget per supplier per minute
    pub const PURGE_MAX_PER_MINUTE: u32 = 3;

    /// Default stream tick in milliseconds
    pub const STREAM_TICK_MS: u64 = 1000;

    /// Default silent ticks before a ping
    pub const STREAM_PING_EVERY_TICKS: u32 = 15;

    /// Default staleness threshold before a run is reported stuck
    pub const STREAM_STUCK_AFTER_SECONDS: i64 = 120;

    /// Default stream connection cap per caller class
    pub const STREAM_MAX_CONNECTIONS_PER_CLASS: usize = 4;

    /// Default database pool size
    pub const DB_MAX_CONNECTIONS: u32 = 10;
}
