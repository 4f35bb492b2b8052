//! Error taxonomy for the service facade
//!
//! Every blocked or failed state surfaces a stable machine-readable code
//! plus a human hint sentence. Guard conflicts are always safe to retry
//! later; validation errors never are retried automatically.

use thiserror::Error;

/// Errors returned synchronously by orchestrator operations.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The template exists but its crawl configuration is incomplete.
    #[error("missing configuration: {hint}")]
    MissingConfig { hint: String },

    /// Unknown template, run, or supplier.
    #[error("not found: {hint}")]
    NotFound { hint: String },

    /// Malformed input, including off-domain discovery URLs.
    #[error("invalid input: {hint}")]
    Validation { hint: String },

    /// A prepare/crawl cycle is already active for the template.
    #[error("a prepare cycle is already active for this template")]
    BlockedPrepare,

    /// A publish for the template is still in progress.
    #[error("a publish is currently in progress for this template")]
    BlockedPublish,

    /// Recrawl started too recently for the same template.
    #[error("recrawl was started too recently; retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    /// The delegated publish collaborator reported a failure. Prior
    /// approvals are not rolled back.
    #[error("publish step failed: {hint}")]
    PublishFailed { hint: String },

    /// Anything unexpected from the pipeline or storage layer.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ImportError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MissingConfig { .. } => "missing_config",
            ImportError::NotFound { .. } => "not_found",
            ImportError::Validation { .. } => "invalid_input",
            ImportError::BlockedPrepare => "blocked_prepare",
            ImportError::BlockedPublish => "blocked_publish",
            ImportError::RateLimited { .. } => "rate_limit",
            ImportError::PublishFailed { .. } => "publish_failed",
            ImportError::Internal(_) => "internal",
        }
    }

    /// HTTP-equivalent status for the excluded UI layer's transport.
    pub fn http_status(&self) -> u16 {
        match self {
            ImportError::MissingConfig { .. } | ImportError::Validation { .. } => 400,
            ImportError::NotFound { .. } => 404,
            ImportError::BlockedPrepare | ImportError::BlockedPublish => 409,
            ImportError::RateLimited { .. } => 429,
            ImportError::PublishFailed { .. } | ImportError::Internal(_) => 500,
        }
    }

    /// Seconds the caller should wait before retrying, when applicable.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            ImportError::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_codes_and_statuses() {
        assert_eq!(ImportError::BlockedPrepare.code(), "blocked_prepare");
        assert_eq!(ImportError::BlockedPrepare.http_status(), 409);
        assert_eq!(ImportError::BlockedPublish.code(), "blocked_publish");
        assert_eq!(ImportError::BlockedPublish.http_status(), 409);

        let limited = ImportError::RateLimited {
            retry_after_seconds: 120,
        };
        assert_eq!(limited.code(), "rate_limit");
        assert_eq!(limited.http_status(), 429);
        assert_eq!(limited.retry_after_seconds(), Some(120));
    }

    #[test]
    fn validation_is_4xx() {
        let err = ImportError::Validation {
            hint: "start URL is off-domain".to_string(),
        };
        assert_eq!(err.http_status(), 400);
        assert!(err.retry_after_seconds().is_none());
    }
}
