//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Queue consumers, queue writers and their breaker settings.
    pub queues: QueueConfig,

    /// Notification (publish) endpoints and their shared breaker.
    pub notifications: NotificationConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Queue module configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Master switch for consumers and writers.
    pub enabled: bool,

    /// Consumer definitions; each expands into `concurrency × endpoints` workers.
    pub consumers: Vec<ConsumerConfig>,

    /// Named producer endpoints.
    pub queue_writers: BTreeMap<String, EndpointConfig>,

    /// Breaker settings applied to every worker's breaker.
    pub breaker: BreakerConfig,
}

/// One consumer definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
    /// Identifier of a handler registered in the `HandlerRegistry`.
    #[serde(default)]
    pub handler: String,

    /// Disabled consumers start no workers and connect no clients.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Workers per endpoint.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Queues polled by this consumer.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

/// A remote queue.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct EndpointConfig {
    /// Logical queue name, resolved to an address by the queue client.
    #[serde(default)]
    pub queue_name: String,

    /// Backend region.
    #[serde(default)]
    pub region: String,

    /// Explicit network endpoint overriding the regional default.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl EndpointConfig {
    pub fn new(queue_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            region: region.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Client cache key: one client per distinct (region, endpoint override).
    pub fn cache_key(&self) -> String {
        endpoint_key(&self.region, self.endpoint.as_deref())
    }
}

/// Notification module configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NotificationConfig {
    /// Enables the notification service.
    pub enabled: bool,

    /// Ordered failover list; the first entry is active at startup.
    pub endpoints: Vec<NotificationEndpointConfig>,

    /// Settings for the breaker shared across the active client.
    pub breaker: BreakerConfig,
}

/// A remote notification service endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct NotificationEndpointConfig {
    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub endpoint: Option<String>,
}

impl NotificationEndpointConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
        }
    }

    pub fn cache_key(&self) -> String {
        endpoint_key(&self.region, self.endpoint.as_deref())
    }
}

fn endpoint_key(region: &str, endpoint: Option<&str>) -> String {
    format!("{}:{}", region, endpoint.unwrap_or("none"))
}

/// Circuit breaker tuning.
///
/// Defaults follow the classic ring-buffer breaker: evaluate once 100 calls
/// are buffered, open at 50% failures, stay open for 60 seconds, then allow
/// 10 trial calls.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage (0 < p <= 100) at or above which the breaker opens.
    pub failure_rate_threshold: f32,

    /// Number of most recent outcomes kept while closed.
    pub sliding_window_size: usize,

    /// Outcomes required before the failure rate is evaluated.
    pub minimum_number_of_calls: usize,

    /// Time spent open before trial calls are allowed, in milliseconds.
    pub wait_duration_open_ms: u64,

    /// Trial calls allowed while half-open.
    pub permitted_calls_in_half_open: u32,
}

impl BreakerConfig {
    pub fn wait_duration_open(&self) -> Duration {
        Duration::from_millis(self.wait_duration_open_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_open_ms: 60_000,
            permitted_calls_in_half_open: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: `pretty` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
