//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Registry → Notification service → Consumer pool
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Application::stop
//!     SIGUSR1/SIGUSR2 → pause / resume consumers
//!     SIGHUP → notification failover
//!
//! Shutdown (shutdown.rs):
//!     trigger → loop observes at its next boundary → confirm → waiters released
//! ```
//!
//! # Design Decisions
//! - Ordered startup: workers spawn only after everything they use exists
//! - Ordered shutdown: drain workers, then release clients
//! - No stop deadline: the slowest in-flight cycle bounds shutdown

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{ConfirmGuard, Shutdown};
pub use signals::{ControlSignal, SignalListener};
pub use startup::{Application, ApplicationError};
