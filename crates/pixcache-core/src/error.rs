//! Error types for pixcache.
//!
//! Expected cache misses are not errors: they are modelled by
//! [`crate::cache::CacheMiss`] and handled inside the mediators. Everything
//! in [`PixError`] is a real failure scoped to a single resource.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the pixcache library.
#[derive(Debug, Error)]
pub enum PixError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    // Storage errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Coordination errors
    #[error("Shared fetch for {key} failed: {message}")]
    SharedFetchFailed { key: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for pixcache operations.
pub type Result<T> = std::result::Result<T, PixError>;

impl From<std::io::Error> for PixError {
    fn from(err: std::io::Error) -> Self {
        PixError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PixError {
    fn from(err: serde_json::Error) -> Self {
        PixError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for PixError {
    fn from(err: rusqlite::Error) -> Self {
        PixError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for PixError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PixError::Timeout(std::time::Duration::from_secs(0))
        } else if let Some(status) = err.status() {
            PixError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            PixError::Network {
                message: err.to_string(),
                cause: Some(err.to_string()),
            }
        }
    }
}

impl PixError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PixError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Upstream 5xx and 408 responses are transient; other statuses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PixError::Network { .. } | PixError::Timeout(_) | PixError::RateLimited { .. } => true,
            PixError::Upstream { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the failure came from the upstream side rather than local storage.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            PixError::Network { .. }
                | PixError::Timeout(_)
                | PixError::RateLimited { .. }
                | PixError::Upstream { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PixError::Upstream {
            status: 404,
            message: "no such illust".into(),
        };
        assert_eq!(err.to_string(), "Upstream returned 404: no such illust");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(PixError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(PixError::Upstream {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!PixError::Upstream {
            status: 403,
            message: "forbidden".into()
        }
        .is_retryable());
        assert!(!PixError::Config {
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_shared_failure_is_not_upstream() {
        let err = PixError::SharedFetchFailed {
            key: "ranking:day".into(),
            message: "boom".into(),
        };
        assert!(!err.is_upstream());
        assert!(!err.is_retryable());
    }
}
