//! Application layer module
//!
//! Use cases orchestrating the domain: paginated discovery, field
//! normalization, the staged/canonical diff pass, the per-template run
//! state machine, and the progress/log stream.

pub mod diff;
pub mod discovery;
pub mod normalizer;
pub mod orchestrator;
pub mod rate_limiter;
pub mod stream;

pub use diff::DiffEngine;
pub use discovery::{DiscoveryDebug, DiscoveryOptions, DiscoveryOutcome, PaginatedDiscovery};
pub use normalizer::Normalizer;
pub use orchestrator::{
    DiffSelection, ImportOrchestrator, PrepareStarted, PublishTotals, Publisher, RecrawlOptions,
    RecrawlOutcome,
};
pub use rate_limiter::SlidingWindowLimiter;
pub use stream::RunStreamService;
