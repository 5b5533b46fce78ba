//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through and outcomes are recorded
//! - Open: backend assumed down, calls fail fast without reaching it
//! - Half-Open: a bounded number of trial calls test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold over the sliding window
//! Open → Half-Open: after the configured wait (evaluated lazily on access)
//! Half-Open → Closed: every permitted trial call succeeds
//! Half-Open → Open: any breaker-relevant trial failure
//! ```
//!
//! # Design Decisions
//! - Per-endpoint breaker unless explicitly shared
//! - Failure classification is pluggable; rejected errors count as successes
//! - Listeners run synchronously on the thread that caused the transition,
//!   after the state lock is released
//! - A listener may not change the state of the breaker that is notifying it

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::classifier::{self, FailurePredicate};
use crate::transport::{BackendError, BackendResult};

/// Circuit breaker states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change observed by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl StateTransition {
    pub fn is_closed_to_open(&self) -> bool {
        self.from == CircuitState::Closed && self.to == CircuitState::Open
    }
}

/// Callback invoked on every transition. Must not block.
pub type TransitionListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Errors returned by a protected call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// The call was short-circuited without reaching the backend.
    #[error("Circuit breaker is open for {name}")]
    Open { name: String },

    /// The backend was called and failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CircuitBreakerError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    /// Failure percentage over the buffered outcomes (0 when empty).
    pub failure_rate: f32,
    pub buffered_calls: usize,
    pub failed_calls: usize,
}

/// Count-based ring of the most recent outcomes.
#[derive(Debug)]
struct SlidingWindow {
    outcomes: VecDeque<bool>,
    failures: usize,
    capacity: usize,
}

impl SlidingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            failures: 0,
            capacity: capacity.max(1),
        }
    }

    fn record(&mut self, failed: bool) {
        if self.outcomes.len() == self.capacity {
            if let Some(true) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(failed);
        if failed {
            self.failures += 1;
        }
    }

    fn len(&self) -> usize {
        self.outcomes.len()
    }

    fn failure_rate(&self) -> f32 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.failures as f32 * 100.0 / self.outcomes.len() as f32
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

thread_local! {
    /// Breakers currently notifying listeners on this thread.
    static NOTIFYING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Failure-rate circuit breaker guarding one call path.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    classifier: FailurePredicate,
    /// Calls needed before the rate is evaluated, never more than the window holds.
    minimum_calls: usize,
    inner: Mutex<BreakerInner>,
    listeners: RwLock<Vec<TransitionListener>>,
}

impl CircuitBreaker {
    /// Create a breaker that treats every backend error as a failure.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_classifier(name, config, classifier::record_all())
    }

    /// Create a breaker with a custom failure classifier.
    pub fn with_classifier(
        name: impl Into<String>,
        config: BreakerConfig,
        classifier: FailurePredicate,
    ) -> Self {
        let name = name.into();
        let minimum_calls = config
            .minimum_number_of_calls
            .clamp(1, config.sliding_window_size.max(1));
        debug!(
            breaker = %name,
            failure_rate_threshold = config.failure_rate_threshold,
            sliding_window_size = config.sliding_window_size,
            wait_duration_open_ms = config.wait_duration_open_ms,
            "Circuit breaker initialized"
        );
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: SlidingWindow::new(config.sliding_window_size),
                opened_at: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
            }),
            name,
            config,
            classifier,
            minimum_calls,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a transition listener.
    pub fn on_state_transition<F>(&self, listener: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Current state, moving Open → Half-Open if the wait has elapsed.
    pub fn state(&self) -> CircuitState {
        if self.is_notifying() {
            return self.lock().state;
        }
        let (state, transition) = {
            let mut inner = self.lock();
            let transition = self.check_open_elapsed(&mut inner);
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Ask for permission to call the backend.
    ///
    /// Every `true` must be followed by exactly one `record_success`,
    /// `record_failure` or `release_permission`.
    pub fn try_acquire(&self) -> bool {
        if self.reject_reentrant("try_acquire") {
            return false;
        }
        let (allowed, transition) = {
            let mut inner = self.lock();
            let transition = self.check_open_elapsed(&mut inner);
            let allowed = match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => {
                    if inner.half_open_in_flight + inner.half_open_successes
                        < self.config.permitted_calls_in_half_open
                    {
                        inner.half_open_in_flight += 1;
                        true
                    } else {
                        false
                    }
                }
            };
            (allowed, transition)
        };
        self.notify(transition);
        allowed
    }

    /// Return a permission that produced no outcome (the call was abandoned).
    pub fn release_permission(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    pub fn record_success(&self) {
        self.record_outcome(false);
    }

    /// Record a failed call; only errors accepted by the classifier count.
    pub fn record_failure(&self, error: &BackendError) {
        let relevant = (self.classifier)(error);
        if !relevant {
            debug!(breaker = %self.name, error = %error, "Error not breaker-relevant, recorded as success");
        }
        self.record_outcome(relevant);
    }

    /// Execute `operation` under breaker protection, recording its outcome.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        }

        let mut permit = Permit {
            breaker: self,
            settled: false,
        };
        let result = operation().await;
        permit.settled = true;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        result.map_err(CircuitBreakerError::Backend)
    }

    /// Force the breaker open, bypassing rate evaluation.
    pub fn transition_to_open(&self) {
        self.force(CircuitState::Open);
    }

    /// Force the breaker closed, discarding all recorded outcomes.
    pub fn transition_to_closed(&self) {
        self.force(CircuitState::Closed);
    }

    /// Force the breaker into trial mode.
    pub fn transition_to_half_open(&self) {
        self.force(CircuitState::HalfOpen);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_rate: inner.window.failure_rate(),
            buffered_calls: inner.window.len(),
            failed_calls: inner.window.failures,
        }
    }

    fn force(&self, to: CircuitState) {
        if self.reject_reentrant("forced transition") {
            return;
        }
        info!(breaker = %self.name, to = %to, "Circuit breaker state forced");
        let transition = {
            let mut inner = self.lock();
            self.apply(&mut inner, to)
        };
        self.notify(transition);
    }

    fn record_outcome(&self, failed: bool) {
        if self.reject_reentrant("record outcome") {
            return;
        }
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.window.record(failed);
                    let rate = inner.window.failure_rate();
                    if inner.window.len() >= self.minimum_calls
                        && rate >= self.config.failure_rate_threshold
                    {
                        warn!(
                            breaker = %self.name,
                            failure_rate = rate,
                            threshold = self.config.failure_rate_threshold,
                            "Failure rate threshold exceeded"
                        );
                        self.apply(&mut inner, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    if failed {
                        self.apply(&mut inner, CircuitState::Open)
                    } else {
                        inner.half_open_successes += 1;
                        if inner.half_open_successes >= self.config.permitted_calls_in_half_open {
                            self.apply(&mut inner, CircuitState::Closed)
                        } else {
                            None
                        }
                    }
                }
                // Outcome of a call admitted before the breaker opened.
                CircuitState::Open => None,
            }
        };
        self.notify(transition);
    }

    fn check_open_elapsed(&self, inner: &mut BreakerInner) -> Option<StateTransition> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner
            .opened_at
            .map_or(true, |at| at.elapsed() >= self.config.wait_duration_open());
        if elapsed {
            self.apply(inner, CircuitState::HalfOpen)
        } else {
            None
        }
    }

    /// Move to `to`, resetting the per-state bookkeeping. Caller holds the lock.
    fn apply(&self, inner: &mut BreakerInner, to: CircuitState) -> Option<StateTransition> {
        let from = inner.state;
        inner.state = to;
        inner.half_open_in_flight = 0;
        inner.half_open_successes = 0;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.window.clear();
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen => {
                inner.opened_at = None;
            }
        }

        if from == to {
            return None;
        }
        match to {
            CircuitState::Open => warn!(breaker = %self.name, from = %from, "Circuit breaker opened"),
            _ => info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker transitioned"),
        }
        metrics::record_breaker_transition(&self.name, from, to);
        Some(StateTransition { from, to })
    }

    fn notify(&self, transition: Option<StateTransition>) {
        let Some(transition) = transition else {
            return;
        };
        let listeners: Vec<TransitionListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }

        let id = self.id();
        NOTIFYING.with(|n| n.borrow_mut().push(id));
        for listener in &listeners {
            listener(&transition);
        }
        NOTIFYING.with(|n| {
            let mut n = n.borrow_mut();
            if let Some(pos) = n.iter().rposition(|&b| b == id) {
                n.remove(pos);
            }
        });
    }

    fn is_notifying(&self) -> bool {
        let id = self.id();
        NOTIFYING.with(|n| n.borrow().contains(&id))
    }

    fn reject_reentrant(&self, operation: &str) -> bool {
        if self.is_notifying() {
            warn!(
                breaker = %self.name,
                operation,
                "Transition listener attempted to mutate its own breaker; ignored"
            );
            true
        } else {
            false
        }
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.lock().state)
            .field("config", &self.config)
            .finish()
    }
}

/// Returns the half-open permit if a protected call is dropped mid-flight.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_permission();
        }
    }
}
