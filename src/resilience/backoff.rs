//! Exponential backoff for breaker-open cycles.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound on a single wait.
pub const MAX_WAIT: Duration = Duration::from_millis(60_000);

/// Base unit of the exponential term.
const BASE_WAIT_MS: f64 = 1000.0;

/// Calculate the wait for a given attempt count: `min(2^attempts * 1s, 60s)`.
pub fn calculate_backoff(attempts: u32) -> Duration {
    let max_ms = MAX_WAIT.as_millis() as f64;
    // powi saturates to infinity long before u32::MAX, and min() clamps it.
    let wait_ms = (2f64.powi(attempts.min(i32::MAX as u32) as i32).round() * BASE_WAIT_MS).min(max_ms);
    Duration::from_millis(wait_ms as u64)
}

/// Attempt counter plus the waits derived from it.
///
/// The counter is atomic so a breaker transition listener can reset it while
/// the owning worker is between cycles.
#[derive(Debug, Default)]
pub struct ExponentialBackoff {
    attempts: AtomicU32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of waits performed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The duration the next `wait` will sleep for.
    pub fn next_delay(&self) -> Duration {
        calculate_backoff(self.attempts())
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Release);
    }

    /// Sleep for the current delay, then count the attempt.
    pub async fn wait(&self) {
        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Circuit is open, backing off");
        tokio::time::sleep(delay).await;
        self.mark();
    }

    /// Like `wait`, but returns early when `cancel` fires.
    ///
    /// The attempt is counted either way; an interrupted wait is just a shorter one.
    pub async fn wait_or_cancel(&self, cancel: &CancellationToken) {
        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Circuit is open, backing off");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                debug!("Backoff interrupted by shutdown");
            }
        }
        self.mark();
    }

    fn mark(&self) {
        let _ = self
            .attempts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |a| Some(a.saturating_add(1)));
    }
}
