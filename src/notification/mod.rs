//! Notification (publish) subsystem.
//!
//! # Data Flow
//! ```text
//! NotificationConfig.endpoints (ordered)
//!     → NotificationClientProvider::connect (one client each)
//!     → failover.rs (immutable list + active pointer)
//!     → service.rs (every call: active client, shared "sns" breaker)
//!
//! Breaker Closed → Open  ──▶  active = (active + 1) mod len
//! ```
//!
//! # Design Decisions
//! - Failover is breaker-driven: a failure that does not trip the breaker
//!   never rotates
//! - Only server-side errors are breaker-relevant
//! - Operator failover rotates without touching the breaker

pub mod failover;
pub mod service;

pub use failover::FailoverSelector;
pub use service::{NotificationError, NotificationService};
