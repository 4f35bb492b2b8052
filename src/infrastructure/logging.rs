//! Logging system configuration and initialization
//!
//! Sets up `tracing` with a console layer and an optional daily-rolling
//! file layer. Dependency noise (sqlx query logs, reqwest internals) is
//! suppressed unless the configured level is `trace`; `RUST_LOG` always
//! wins when set.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive for the process lifetime
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

fn build_env_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directives = if level == "trace" {
        level.to_string()
    } else {
        // Quiet the chatty dependencies unless explicitly traced
        format!("{level},sqlx::query=warn,sqlx=warn,reqwest=warn,hyper=warn,chromiumoxide=warn")
    };

    EnvFilter::new(directives)
}

/// Initialize the logging system with default configuration.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Initialize logging with the given configuration.
///
/// Safe to call once per process; a second call returns an error from the
/// global subscriber registration.
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let filter = build_env_filter(&config.level);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(true);

    if config.file_enabled {
        let log_dir = PathBuf::from(&config.directory);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

        let file_appender = rolling::daily(&log_dir, "rodsync.log");
        let (file_writer, guard) = non_blocking(file_appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard mutex poisoned"))?
            .push(guard);

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true);

        Registry::default()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    } else {
        Registry::default()
            .with(filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    }

    tracing::info!(level = %config.level, file = config.file_enabled, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_suppresses_dependency_noise_below_trace() {
        std::env::remove_var("RUST_LOG");
        let filter = build_env_filter("debug");
        let rendered = filter.to_string();
        assert!(rendered.contains("sqlx"));
        assert!(rendered.contains("reqwest"));
    }

    #[test]
    fn trace_level_keeps_everything() {
        std::env::remove_var("RUST_LOG");
        let filter = build_env_filter("trace");
        assert_eq!(filter.to_string(), "trace");
    }
}
