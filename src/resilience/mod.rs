//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend:
//!     → circuit_breaker.rs (admit or short-circuit, record outcome)
//!     → classifier.rs (decide whether an error counts toward opening)
//!     → listeners (worker backoff reset, notification failover)
//!
//! Worker cycle while open:
//!     → backoff.rs (exponential wait, grows per consecutive open cycle)
//! ```
//!
//! # Design Decisions
//! - One breaker per protected call path; sharing is explicit
//! - Backoff is reset by the breaker leaving Open, not by successful polls
//! - The protected-call combinator is the only way backend calls are wrapped

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerError, CircuitState, StateTransition,
};
pub use classifier::FailurePredicate;
