//! Polling worker bound to one queue endpoint.
//!
//! # Cycle
//! ```text
//! breaker open?  → back off (grows the delay), skip the cycle
//! queue url      → resolved once, cached for the worker's lifetime
//! receive        → through the breaker; failure or rejection = empty batch
//! each message   → consume, then delete through the breaker
//! ```
//!
//! Shutdown is cooperative: it is checked between cycles and interrupts a
//! backoff wait, but an in-flight receive or handler call always completes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, error, info, warn};

use crate::config::EndpointConfig;
use crate::consumer::handler::MessageHandler;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState, ExponentialBackoff};
use crate::transport::{BackendError, Message, QueueClient};

/// Failures that permanently stop a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No queue name configured for endpoint {endpoint}")]
    MissingQueueName { endpoint: String },

    #[error("Failed to resolve url of queue {queue}: {source}")]
    QueueResolution {
        queue: String,
        #[source]
        source: BackendError,
    },
}

/// Lifecycle of a worker's run loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running = 0,
    /// Stop requested; the current cycle is finishing.
    Draining = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Running,
            1 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

pub struct PollingWorker {
    endpoint: EndpointConfig,
    client: Arc<dyn QueueClient>,
    handler: Arc<dyn MessageHandler>,
    breaker: Arc<CircuitBreaker>,
    backoff: Arc<ExponentialBackoff>,
    /// Woken when the breaker leaves Open, cutting a backoff wait short.
    resumed: Arc<Notify>,
    queue_url: OnceCell<String>,
    shutdown: Shutdown,
    state: AtomicU8,
}

impl PollingWorker {
    /// Build a worker. Its backoff is reset, and any wait in progress ends,
    /// whenever `breaker` leaves Open.
    pub fn new(
        endpoint: EndpointConfig,
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn MessageHandler>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let backoff = Arc::new(ExponentialBackoff::new());
        let resumed = Arc::new(Notify::new());
        let (reset, wake) = (backoff.clone(), resumed.clone());
        breaker.on_state_transition(move |t| {
            if t.from == CircuitState::Open && t.to != CircuitState::Open {
                reset.reset();
                wake.notify_waiters();
            }
        });

        Self {
            endpoint,
            client,
            handler,
            breaker,
            backoff,
            resumed,
            queue_url: OnceCell::new(),
            shutdown: Shutdown::new(),
            state: AtomicU8::new(WorkerState::Running as u8),
        }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Request stop. Non-blocking and idempotent.
    pub fn shutdown(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shutdown.trigger();
    }

    /// Wait until `run` has exited. Any number of callers may wait.
    ///
    /// Only returns for a worker whose `run` was started.
    pub async fn await_shutdown(&self) {
        self.shutdown.wait_confirmed().await;
    }

    /// Run cycles until shutdown is requested or a fatal failure occurs.
    pub async fn run(&self) {
        let _confirm = self.shutdown.confirm_on_drop();
        let queue = self.endpoint.queue_name.as_str();
        info!(queue, region = %self.endpoint.region, "Polling worker started");

        while !self.shutdown.is_triggered() {
            match AssertUnwindSafe(self.poll_once()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(queue, error = %e, "Polling worker terminated");
                    self.shutdown.trigger();
                    break;
                }
                Err(panic) => {
                    error!(queue, panic = %panic_message(&*panic), "Polling worker terminated by panic");
                    self.shutdown.trigger();
                    break;
                }
            }
            // A backend that answers instantly must not starve other tasks.
            tokio::task::yield_now().await;
        }

        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
        info!(queue, "Polling worker stopped");
    }

    async fn poll_once(&self) -> Result<(), WorkerError> {
        let queue = self.endpoint.queue_name.as_str();

        // Registered before the state check so a transition in between still wakes us.
        let resumed = self.resumed.notified();
        if self.breaker.state() == CircuitState::Open {
            tokio::select! {
                _ = self.backoff.wait_or_cancel(self.shutdown.token()) => {}
                _ = resumed => debug!(queue, "Circuit left open state, backoff cut short"),
            }
            if self.shutdown.is_triggered() {
                return Ok(());
            }
        }

        let queue_url = self.resolve_queue_url().await?;
        let mut request = self.handler.receive_request();
        if request.needs_queue_url() {
            request.queue_url = Some(queue_url.to_string());
        }
        let target = request.queue_url.clone().unwrap_or_default();

        let client = &self.client;
        let messages = match self.breaker.call(|| client.receive_messages(request)).await {
            Ok(messages) => messages,
            Err(CircuitBreakerError::Open { .. }) => {
                debug!(queue, "Receive rejected by open circuit");
                return Ok(());
            }
            Err(CircuitBreakerError::Backend(e)) => {
                warn!(queue, error = %e, "Failed to receive messages");
                return Ok(());
            }
        };

        if messages.is_empty() {
            return Ok(());
        }
        debug!(queue, count = messages.len(), "Received messages");
        metrics::record_received(queue, messages.len());

        for message in &messages {
            self.process(&target, message).await;
        }
        Ok(())
    }

    /// Consume then delete one message. Failures are logged, never returned.
    async fn process(&self, queue_url: &str, message: &Message) {
        let queue = self.endpoint.queue_name.as_str();

        match self.handler.consume(message).await {
            Ok(()) => metrics::record_consumed(queue, true),
            Err(e) => {
                metrics::record_consumed(queue, false);
                error!(queue, message_id = %message.message_id, error = %e, "Failed to consume message");
            }
        }

        let client = &self.client;
        let receipt = message.receipt_handle.as_str();
        match self.breaker.call(|| client.delete_message(queue_url, receipt)).await {
            Ok(()) => metrics::record_deleted(queue, true),
            Err(e) => {
                metrics::record_deleted(queue, false);
                warn!(queue, message_id = %message.message_id, error = %e, "Failed to delete message");
            }
        }
    }

    async fn resolve_queue_url(&self) -> Result<&str, WorkerError> {
        let name = self.endpoint.queue_name.as_str();
        if name.is_empty() {
            return Err(WorkerError::MissingQueueName {
                endpoint: self.endpoint.cache_key(),
            });
        }
        let url = self
            .queue_url
            .get_or_try_init(|| async {
                let url = self
                    .client
                    .get_queue_url(name)
                    .await
                    .map_err(|source| WorkerError::QueueResolution {
                        queue: name.to_string(),
                        source,
                    })?;
                debug!(queue = name, queue_url = %url, "Resolved queue url");
                Ok::<_, WorkerError>(url)
            })
            .await?;
        Ok(url.as_str())
    }
}

impl std::fmt::Debug for PollingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWorker")
            .field("queue", &self.endpoint.queue_name)
            .field("region", &self.endpoint.region)
            .field("state", &self.state())
            .field("breaker", &self.breaker.state())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::consumer::handler::HandlerError;
    use crate::transport::{BackendResult, ReceiveRequest, SendMessageRequest, SendMessageResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedClient {
        batches: Mutex<VecDeque<BackendResult<Vec<Message>>>>,
        receives: AtomicUsize,
        resolves: AtomicUsize,
        deleted: Mutex<Vec<String>>,
        unknown_queue: bool,
    }

    #[async_trait]
    impl QueueClient for ScriptedClient {
        async fn get_queue_url(&self, queue_name: &str) -> BackendResult<String> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if self.unknown_queue {
                return Err(BackendError::with_status("queue does not exist", 400));
            }
            Ok(format!("memory://test/{}", queue_name))
        }

        async fn create_queue(&self, queue_name: &str) -> BackendResult<String> {
            self.get_queue_url(queue_name).await
        }

        async fn receive_messages(&self, request: ReceiveRequest) -> BackendResult<Vec<Message>> {
            assert_eq!(request.queue_url.as_deref(), Some("memory://test/orders"));
            self.receives.fetch_add(1, Ordering::SeqCst);
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn delete_message(&self, _queue_url: &str, receipt_handle: &str) -> BackendResult<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }

        async fn send_message(&self, _request: SendMessageRequest) -> BackendResult<SendMessageResponse> {
            Err(BackendError::new("unsupported"))
        }
    }

    struct FailOn(&'static str);

    #[async_trait]
    impl MessageHandler for FailOn {
        async fn consume(&self, message: &Message) -> Result<(), HandlerError> {
            if message.body == self.0 {
                return Err("rejected".into());
            }
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl MessageHandler for Panics {
        async fn consume(&self, _message: &Message) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    fn message(n: usize) -> Message {
        Message {
            message_id: format!("id-{}", n),
            receipt_handle: format!("rh-{}", n),
            body: n.to_string(),
            attributes: Default::default(),
            message_attributes: Default::default(),
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        let config = BreakerConfig {
            sliding_window_size: 2,
            minimum_number_of_calls: 2,
            wait_duration_open_ms: 600_000,
            ..BreakerConfig::default()
        };
        Arc::new(CircuitBreaker::new("sqs-orders", config))
    }

    fn worker(client: Arc<ScriptedClient>, handler: Arc<dyn MessageHandler>) -> Arc<PollingWorker> {
        Arc::new(PollingWorker::new(
            EndpointConfig::new("orders", "us-east-1"),
            client,
            handler,
            breaker(),
        ))
    }

    fn spawn(worker: &Arc<PollingWorker>) -> tokio::task::JoinHandle<()> {
        let w = worker.clone();
        tokio::spawn(async move { w.run().await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_failure_isolated_and_all_deleted() {
        let client = Arc::new(ScriptedClient::default());
        client
            .batches
            .lock()
            .unwrap()
            .push_back(Ok(vec![message(1), message(2), message(3)]));
        let worker = worker(client.clone(), Arc::new(FailOn("2")));
        let handle = spawn(&worker);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*client.deleted.lock().unwrap(), vec!["rh-1", "rh-2", "rh-3"]);
        // Polling went on after the batch.
        assert!(client.receives.load(Ordering::SeqCst) > 1);
        assert_eq!(client.resolves.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state(), WorkerState::Running);

        worker.shutdown();
        worker.await_shutdown().await;
        handle.await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_backs_off_without_receiving() {
        let client = Arc::new(ScriptedClient::default());
        let worker = worker(client.clone(), Arc::new(FailOn("")));
        worker.breaker().transition_to_open();
        let handle = spawn(&worker);

        // Waits of 1s, 2s and 4s fit in ten seconds.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.receives.load(Ordering::SeqCst), 0);
        assert_eq!(worker.backoff().attempts(), 3);

        // Leaving Open resets the backoff and polling resumes.
        worker.breaker().transition_to_closed();
        assert_eq!(worker.backoff().attempts(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(client.receives.load(Ordering::SeqCst) > 0);

        worker.shutdown();
        worker.await_shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff_and_is_idempotent() {
        let client = Arc::new(ScriptedClient::default());
        let worker = worker(client, Arc::new(FailOn("")));
        worker.breaker().transition_to_open();
        let handle = spawn(&worker);
        tokio::time::sleep(Duration::from_millis(100)).await;

        worker.shutdown();
        worker.shutdown();
        assert_eq!(worker.state(), WorkerState::Draining);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let w = worker.clone();
                tokio::spawn(async move { w.await_shutdown().await })
            })
            .collect();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        handle.await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        // Awaiting again after a repeated shutdown returns immediately.
        worker.shutdown();
        worker.await_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failures_count_toward_breaker() {
        let client = Arc::new(ScriptedClient::default());
        {
            let mut batches = client.batches.lock().unwrap();
            batches.push_back(Err(BackendError::with_status("unavailable", 503)));
            batches.push_back(Err(BackendError::with_status("unavailable", 503)));
        }
        let worker = worker(client.clone(), Arc::new(FailOn("")));
        let handle = spawn(&worker);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(worker.breaker().state(), CircuitState::Open);
        assert_eq!(client.receives.load(Ordering::SeqCst), 2);
        assert_eq!(worker.state(), WorkerState::Running);

        worker.shutdown();
        worker.await_shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_queue_is_fatal() {
        let client = Arc::new(ScriptedClient {
            unknown_queue: true,
            ..ScriptedClient::default()
        });
        let worker = worker(client.clone(), Arc::new(FailOn("")));
        spawn(&worker).await.unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(client.resolves.load(Ordering::SeqCst), 1);
        assert_eq!(client.receives.load(Ordering::SeqCst), 0);
        worker.await_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_stops_worker() {
        let client = Arc::new(ScriptedClient::default());
        client.batches.lock().unwrap().push_back(Ok(vec![message(1)]));
        let worker = worker(client, Arc::new(Panics));

        // The panic is contained in the worker's own task.
        spawn(&worker).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        worker.await_shutdown().await;
    }
}
