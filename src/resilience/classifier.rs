//! Failure classification for circuit breakers.
//!
//! A classifier decides whether a backend error counts toward opening a
//! breaker. Errors it rejects are the caller's problem and are recorded as
//! successful calls.

use std::sync::Arc;
use crate::transport::BackendError;

/// Predicate over backend errors; `true` means "breaker-relevant".
pub type FailurePredicate = Arc<dyn Fn(&BackendError) -> bool + Send + Sync>;

/// Every backend error counts. Used for queue workers.
pub fn record_all() -> FailurePredicate {
    Arc::new(|_| true)
}

/// Only 5xx-equivalent errors count. Used for the notification failover breaker.
pub fn server_errors_only() -> FailurePredicate {
    Arc::new(BackendError::is_server_error)
}
