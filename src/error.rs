//! Error types for campaign-sync.

use std::time::Duration;

/// Top-level error type for pipeline work.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("{label} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport or API failure from one of the external services.
///
/// Every variant is considered transient and is retried by the
/// [`RetryRunner`](crate::retry::RetryRunner).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{service} request failed: {reason}")]
    Http { service: String, reason: String },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    Decode { service: String, reason: String },

    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },
}

impl RemoteError {
    /// Wrap a reqwest failure, keeping timeouts distinguishable.
    pub fn from_reqwest(service: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout {
                service: service.to_string(),
                timeout,
            }
        } else if err.is_decode() {
            RemoteError::Decode {
                service: service.to_string(),
                reason: err.to_string(),
            }
        } else {
            RemoteError::Http {
                service: service.to_string(),
                reason: err.to_string(),
            }
        }
    }

    pub fn decode(service: &str, reason: impl Into<String>) -> Self {
        RemoteError::Decode {
            service: service.to_string(),
            reason: reason.into(),
        }
    }
}

/// Chat notification errors. Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Webhook request failed: {0}")]
    Http(String),

    #[error("Webhook returned {status}")]
    Rejected { status: u16 },
}

/// Result type alias for pipeline work.
pub type Result<T> = std::result::Result<T, SyncError>;
