//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use queue_sentinel::config::{BreakerConfig, ConsumerConfig, EndpointConfig, QueueConfig};
use queue_sentinel::consumer::{HandlerError, MessageHandler};
use queue_sentinel::transport::{Message, ReceiveRequest};

/// Handler that records every body it sees and fails on chosen ones.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    fail_on: HashSet<String>,
}

impl RecordingHandler {
    pub fn failing_on(bodies: &[&str]) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_on: bodies.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn consume(&self, message: &Message) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message.body.clone());
        if self.fail_on.contains(&message.body) {
            return Err(format!("cannot handle {}", message.body).into());
        }
        Ok(())
    }

    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest::long_poll().with_max_messages(10)
    }
}

/// Event counts by level, plus the messages of error events.
#[derive(Clone, Default)]
pub struct LogCounts {
    errors: Arc<AtomicUsize>,
    warnings: Arc<AtomicUsize>,
    error_messages: Arc<Mutex<Vec<String>>>,
}

impl LogCounts {
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.error_messages.lock().unwrap().clone()
    }
}

struct CountingLayer {
    counts: LogCounts,
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CountingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => {
                self.counts.errors.fetch_add(1, Ordering::SeqCst);
                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);
                self.counts.error_messages.lock().unwrap().push(visitor.0);
            }
            Level::WARN => {
                self.counts.warnings.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// Capture events on this thread until the guard drops.
///
/// Tests using this must run on the current-thread runtime so spawned
/// workers log on the same thread.
pub fn capture_logs() -> (LogCounts, tracing::subscriber::DefaultGuard) {
    let counts = LogCounts::default();
    let subscriber = tracing_subscriber::registry().with(CountingLayer {
        counts: counts.clone(),
    });
    let guard = tracing::subscriber::set_default(subscriber);
    (counts, guard)
}

/// Poll `condition` every 10ms (virtual time under a paused clock).
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn consumer(handler: &str, concurrency: usize, endpoints: Vec<EndpointConfig>) -> ConsumerConfig {
    ConsumerConfig {
        handler: handler.to_string(),
        enabled: true,
        concurrency,
        endpoints,
    }
}

pub fn queue_config(consumers: Vec<ConsumerConfig>, breaker: BreakerConfig) -> QueueConfig {
    QueueConfig {
        enabled: true,
        consumers,
        breaker,
        ..QueueConfig::default()
    }
}

/// A breaker that opens after two failures and allows a trial call after `wait_ms`.
pub fn sensitive_breaker(wait_ms: u64) -> BreakerConfig {
    BreakerConfig {
        failure_rate_threshold: 50.0,
        sliding_window_size: 2,
        minimum_number_of_calls: 2,
        wait_duration_open_ms: wait_ms,
        permitted_calls_in_half_open: 1,
    }
}
