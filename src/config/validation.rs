//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check required references (handlers, queue names, regions)
//! - Validate value ranges (concurrency, breaker thresholds)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Disabled sections are not validated beyond their breaker settings

use thiserror::Error;
use url::Url;

use crate::config::schema::{AppConfig, BreakerConfig, EndpointConfig};

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("consumer #{consumer} must name a handler")]
    MissingHandler { consumer: usize },

    #[error("consumer #{consumer} ({handler}) has concurrency {concurrency}; must be at least 1")]
    InvalidConcurrency {
        consumer: usize,
        handler: String,
        concurrency: usize,
    },

    #[error("consumer #{consumer} ({handler}) has no endpoints")]
    NoConsumerEndpoints { consumer: usize, handler: String },

    #[error("{context}: a queue name is required")]
    MissingQueueName { context: String },

    #[error("{context}: a region is required")]
    MissingRegion { context: String },

    #[error("{context}: endpoint '{endpoint}' is not a valid URL ({reason})")]
    InvalidEndpointUrl {
        context: String,
        endpoint: String,
        reason: String,
    },

    #[error("notifications are enabled but no endpoint is configured; at least one endpoint is required")]
    NoNotificationEndpoints,

    #[error("{section}.breaker.failure_rate_threshold must be in (0, 100], got {value}")]
    InvalidFailureRate { section: &'static str, value: f32 },

    #[error("{section}.breaker.{field} must be at least 1")]
    InvalidBreakerSize {
        section: &'static str,
        field: &'static str,
    },

    #[error("{section}.breaker.minimum_number_of_calls ({minimum}) exceeds sliding_window_size ({window}); the breaker could never open")]
    MinimumCallsExceedWindow {
        section: &'static str,
        minimum: usize,
        window: usize,
    },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.queues.enabled {
        for (idx, consumer) in config.queues.consumers.iter().enumerate() {
            if !consumer.enabled {
                continue;
            }
            if consumer.handler.trim().is_empty() {
                errors.push(ValidationError::MissingHandler { consumer: idx });
            }
            if consumer.concurrency == 0 {
                errors.push(ValidationError::InvalidConcurrency {
                    consumer: idx,
                    handler: consumer.handler.clone(),
                    concurrency: consumer.concurrency,
                });
            }
            if consumer.endpoints.is_empty() {
                errors.push(ValidationError::NoConsumerEndpoints {
                    consumer: idx,
                    handler: consumer.handler.clone(),
                });
            }
            for (e_idx, endpoint) in consumer.endpoints.iter().enumerate() {
                let context = format!("consumer #{} endpoint #{}", idx, e_idx);
                validate_endpoint(&context, endpoint, &mut errors);
            }
        }

        for (name, endpoint) in &config.queues.queue_writers {
            let context = format!("queue writer '{}'", name);
            validate_endpoint(&context, endpoint, &mut errors);
        }
    }

    if config.notifications.enabled {
        if config.notifications.endpoints.is_empty() {
            errors.push(ValidationError::NoNotificationEndpoints);
        }
        for (idx, endpoint) in config.notifications.endpoints.iter().enumerate() {
            let context = format!("notification endpoint #{}", idx);
            if endpoint.region.trim().is_empty() {
                errors.push(ValidationError::MissingRegion { context: context.clone() });
            }
            validate_override(&context, endpoint.endpoint.as_deref(), &mut errors);
        }
    }

    validate_breaker("queues", &config.queues.breaker, &mut errors);
    validate_breaker("notifications", &config.notifications.breaker, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_endpoint(context: &str, endpoint: &EndpointConfig, errors: &mut Vec<ValidationError>) {
    if endpoint.queue_name.trim().is_empty() {
        errors.push(ValidationError::MissingQueueName {
            context: context.to_string(),
        });
    }
    if endpoint.region.trim().is_empty() {
        errors.push(ValidationError::MissingRegion {
            context: context.to_string(),
        });
    }
    validate_override(context, endpoint.endpoint.as_deref(), errors);
}

fn validate_override(context: &str, endpoint: Option<&str>, errors: &mut Vec<ValidationError>) {
    if let Some(raw) = endpoint {
        if let Err(e) = Url::parse(raw) {
            errors.push(ValidationError::InvalidEndpointUrl {
                context: context.to_string(),
                endpoint: raw.to_string(),
                reason: e.to_string(),
            });
        }
    }
}

fn validate_breaker(section: &'static str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    let rate = breaker.failure_rate_threshold;
    if !(rate > 0.0 && rate <= 100.0) {
        errors.push(ValidationError::InvalidFailureRate { section, value: rate });
    }
    if breaker.sliding_window_size == 0 {
        errors.push(ValidationError::InvalidBreakerSize {
            section,
            field: "sliding_window_size",
        });
    }
    if breaker.minimum_number_of_calls == 0 {
        errors.push(ValidationError::InvalidBreakerSize {
            section,
            field: "minimum_number_of_calls",
        });
    }
    if breaker.minimum_number_of_calls > breaker.sliding_window_size && breaker.sliding_window_size > 0 {
        errors.push(ValidationError::MinimumCallsExceedWindow {
            section,
            minimum: breaker.minimum_number_of_calls,
            window: breaker.sliding_window_size,
        });
    }
    if breaker.permitted_calls_in_half_open == 0 {
        errors.push(ValidationError::InvalidBreakerSize {
            section,
            field: "permitted_calls_in_half_open",
        });
    }
}
