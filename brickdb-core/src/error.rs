//! Error types for brickdb-core
//!
//! Request failures are classified once, here, so the request executor and
//! the providers agree on what is worth retrying.

use thiserror::Error;

/// Failure of a single remote call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    /// The source answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// No usable answer at all (DNS, connect, timeout, reset)
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    /// The page arrived but the expected fields could not be extracted
    #[error("Extraction failed: {0}")]
    Extraction(String),
}

impl RequestError {
    /// Transient failures: 400, 401 and any 5xx.
    ///
    /// Everything else is permanent for this request, including failures
    /// that never produced a status (DNS, connect, timeout).
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Status { status, .. } => {
                matches!(*status, 400 | 401) || *status >= 500
            }
            RequestError::Connection { .. } => false,
            RequestError::Extraction(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors surfaced by providers, the snapshot store and the manager
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Snapshot file unreadable; in-memory tables were left untouched
    #[error("Corrupt snapshot {path}: {reason}")]
    CorruptSnapshot { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Common error: {0}")]
    Common(#[from] brickdb_common::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> RequestError {
        RequestError::Status {
            status: code,
            url: "https://example.test".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [400, 401, 500, 502, 503, 599] {
            assert!(status(code).is_retryable(), "{code} should retry");
        }
    }

    #[test]
    fn test_permanent_statuses() {
        for code in [301, 403, 404, 410, 429] {
            assert!(!status(code).is_retryable(), "{code} should not retry");
        }
        assert!(!RequestError::Extraction("no h1".to_string()).is_retryable());
    }

    #[test]
    fn test_connection_errors_are_permanent() {
        let err = RequestError::Connection {
            url: "https://example.test".to_string(),
            message: "timed out".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.status(), None);
    }
}
