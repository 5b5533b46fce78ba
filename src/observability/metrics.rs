//! Metrics collection and exposition.
//!
//! # Metrics
//! - `queue_breaker_transitions_total` (counter): by breaker, from, to
//! - `queue_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `queue_messages_received_total` (counter): by queue
//! - `queue_messages_consumed_total` (counter): by queue, outcome
//! - `queue_messages_deleted_total` (counter): by queue, outcome
//! - `queue_workers_active` (gauge)
//! - `notification_calls_total` (counter): by operation, outcome
//! - `notification_failovers_total` (counter)
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless `init_metrics` is called.

use std::net::SocketAddr;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "queue_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("queue_breaker_state", "breaker" => breaker.to_string()).set(to as u8 as f64);
}

pub fn record_received(queue: &str, count: usize) {
    counter!("queue_messages_received_total", "queue" => queue.to_string()).increment(count as u64);
}

pub fn record_consumed(queue: &str, success: bool) {
    counter!(
        "queue_messages_consumed_total",
        "queue" => queue.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

pub fn record_deleted(queue: &str, success: bool) {
    counter!(
        "queue_messages_deleted_total",
        "queue" => queue.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

pub fn record_active_workers(count: usize) {
    gauge!("queue_workers_active").set(count as f64);
}

pub fn record_notification_call(operation: &'static str, success: bool) {
    counter!(
        "notification_calls_total",
        "operation" => operation,
        "outcome" => outcome(success)
    )
    .increment(1);
}

pub fn record_failover() {
    counter!("notification_failovers_total").increment(1);
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
