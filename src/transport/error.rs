//! Backend error definitions.

use thiserror::Error;

/// Failure reported by a remote queue or notification backend.
///
/// The optional `status` carries the HTTP-equivalent status code of the
/// failed call when the transport knows it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("backend error{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
pub struct BackendError {
    /// Human-readable failure description.
    pub message: String,
    /// Status code returned by the backend, if any.
    pub status: Option<u16>,
}

impl BackendError {
    /// Create an error without a status code (connection failures, timeouts).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Create an error carrying a backend status code.
    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    /// True for 5xx-equivalent failures (the backend's fault, not the caller's).
    pub fn is_server_error(&self) -> bool {
        matches!(self.status, Some(500..=599))
    }
}

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_classification() {
        assert!(BackendError::with_status("boom", 500).is_server_error());
        assert!(BackendError::with_status("unavailable", 503).is_server_error());
        assert!(BackendError::with_status("edge", 599).is_server_error());
        assert!(!BackendError::with_status("throttled", 429).is_server_error());
        assert!(!BackendError::with_status("teapot", 600).is_server_error());
        assert!(!BackendError::new("connection reset").is_server_error());
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::with_status("queue does not exist", 400);
        assert_eq!(err.to_string(), "backend error (status 400): queue does not exist");

        let err = BackendError::new("timed out");
        assert_eq!(err.to_string(), "backend error: timed out");
    }
}
