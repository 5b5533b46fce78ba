//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → sections handed to registry, consumer pool, notification service
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the pool is built from it once at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AppConfig;
pub use schema::BreakerConfig;
pub use schema::ConsumerConfig;
pub use schema::EndpointConfig;
pub use schema::NotificationConfig;
pub use schema::NotificationEndpointConfig;
pub use schema::ObservabilityConfig;
pub use schema::QueueConfig;
