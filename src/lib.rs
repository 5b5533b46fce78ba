//! Resilient queue polling and notification publishing.

pub mod config;
pub mod consumer;
pub mod lifecycle;
pub mod notification;
pub mod observability;
pub mod producer;
pub mod resilience;
pub mod transport;

pub use config::AppConfig;
pub use consumer::{ConsumerManager, HandlerRegistry, MessageHandler, PollingWorker};
pub use lifecycle::{Application, Shutdown};
pub use notification::NotificationService;
pub use resilience::{CircuitBreaker, CircuitState, ExponentialBackoff};
