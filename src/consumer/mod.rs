//! Consumer subsystem.
//!
//! # Data Flow
//! ```text
//! QueueConfig.consumers
//!     → supervisor.rs (expand consumer × endpoint × concurrency)
//!         → registry.rs (one QueueClient per region:endpoint)
//!         → handler.rs (handler id → MessageHandler)
//!         → worker.rs (one task per worker, own breaker + backoff)
//! ```
//!
//! # Design Decisions
//! - Workers share clients but never breakers, backoff or queue urls
//! - Handler failures are isolated per message; the message is still deleted
//! - Pause and resume are forced breaker transitions

pub mod handler;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use handler::{HandlerError, HandlerRegistry, LoggingHandler, MessageHandler};
pub use registry::{ClientRegistry, RegistryError};
pub use supervisor::{ConsumerManager, StartupError};
pub use worker::{PollingWorker, WorkerError, WorkerState};
