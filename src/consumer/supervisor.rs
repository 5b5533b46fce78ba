//! Worker pool supervisor.
//!
//! Expands each enabled consumer into `concurrency × endpoints` polling
//! workers, runs each as its own task, and applies pause, resume and stop
//! across the whole pool.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::consumer::handler::HandlerRegistry;
use crate::consumer::registry::{ClientRegistry, RegistryError};
use crate::consumer::worker::PollingWorker;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitState};

/// Configuration problems that prevent the pool from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Consumer #{index} does not name a handler")]
    MissingHandler { index: usize },

    #[error("No handler registered as {handler}")]
    UnknownHandler { handler: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Default)]
struct Pool {
    workers: Vec<Arc<PollingWorker>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ConsumerManager {
    config: QueueConfig,
    registry: Arc<ClientRegistry>,
    handlers: HandlerRegistry,
    pool: Mutex<Pool>,
}

impl ConsumerManager {
    /// `registry` must already be started for `config`.
    pub fn new(config: QueueConfig, registry: Arc<ClientRegistry>, handlers: HandlerRegistry) -> Self {
        Self {
            config,
            registry,
            handlers,
            pool: Mutex::new(Pool::default()),
        }
    }

    /// Build every worker, then spawn them all. Must run inside a tokio runtime.
    ///
    /// A configuration error aborts before any worker is spawned.
    pub fn start(&self) -> Result<(), StartupError> {
        if !self.config.enabled {
            info!("Queue module disabled, no consumers started");
            return Ok(());
        }

        let mut pool = self.lock();
        if !pool.workers.is_empty() {
            warn!(workers = pool.workers.len(), "Consumer pool already started");
            return Ok(());
        }

        let workers = self.build_workers()?;
        for worker in &workers {
            let w = worker.clone();
            pool.tasks.push(tokio::spawn(async move { w.run().await }));
        }
        pool.workers = workers;

        metrics::record_active_workers(pool.workers.len());
        info!(workers = pool.workers.len(), "Consumer pool started");
        Ok(())
    }

    fn build_workers(&self) -> Result<Vec<Arc<PollingWorker>>, StartupError> {
        let mut workers = Vec::new();
        for (index, consumer) in self.config.consumers.iter().enumerate() {
            if !consumer.enabled {
                info!(handler = %consumer.handler, "Consumer disabled, skipping");
                continue;
            }
            if consumer.handler.is_empty() {
                return Err(StartupError::MissingHandler { index });
            }
            let handler = self
                .handlers
                .get(&consumer.handler)
                .ok_or_else(|| StartupError::UnknownHandler {
                    handler: consumer.handler.clone(),
                })?;

            for endpoint in &consumer.endpoints {
                let client = self.registry.get(endpoint)?;
                for slot in 0..consumer.concurrency {
                    let breaker = Arc::new(CircuitBreaker::new(
                        format!("sqs-{}-{}", endpoint.queue_name, slot),
                        self.config.breaker.clone(),
                    ));
                    workers.push(Arc::new(PollingWorker::new(
                        endpoint.clone(),
                        client.clone(),
                        handler.clone(),
                        breaker,
                    )));
                }
            }
        }
        Ok(workers)
    }

    /// Signal every worker, then wait for each to confirm and its task to finish.
    ///
    /// No overall timeout: this returns once the slowest in-flight cycle ends.
    pub async fn stop(&self) {
        let Pool { workers, tasks } = mem::take(&mut *self.lock());
        if workers.is_empty() {
            return;
        }
        info!(workers = workers.len(), "Stopping consumer pool");

        for worker in &workers {
            worker.shutdown();
        }
        for worker in &workers {
            worker.await_shutdown().await;
        }
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Polling worker task failed");
            }
        }

        metrics::record_active_workers(0);
        info!("Consumer pool stopped");
    }

    /// Force every breaker open; workers back off without calling the backend.
    pub fn pause(&self) {
        let breakers = self.breakers();
        info!(breakers = breakers.len(), "Pausing consumers");
        for breaker in breakers {
            breaker.transition_to_open();
        }
    }

    /// Force every breaker closed; workers resume on their next cycle.
    pub fn resume(&self) {
        let breakers = self.breakers();
        info!(breakers = breakers.len(), "Resuming consumers");
        for breaker in breakers {
            breaker.transition_to_closed();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    pub fn workers(&self) -> Vec<Arc<PollingWorker>> {
        self.lock().workers.clone()
    }

    pub fn breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        self.lock().workers.iter().map(|w| w.breaker().clone()).collect()
    }

    /// `(breaker name, state)` for every worker.
    pub fn breaker_states(&self) -> Vec<(String, CircuitState)> {
        self.breakers()
            .iter()
            .map(|b| (b.name().to_string(), b.state()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConsumerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerManager")
            .field("enabled", &self.config.enabled)
            .field("workers", &self.worker_count())
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsumerConfig, EndpointConfig};
    use crate::consumer::handler::LoggingHandler;
    use crate::consumer::worker::WorkerState;
    use crate::transport::memory::MemoryCloud;

    fn queue_config(handler: &str, concurrency: usize) -> QueueConfig {
        QueueConfig {
            enabled: true,
            consumers: vec![ConsumerConfig {
                handler: handler.to_string(),
                enabled: true,
                concurrency,
                endpoints: vec![
                    EndpointConfig::new("orders", "us-east-1"),
                    EndpointConfig::new("refunds", "us-east-1"),
                ],
            }],
            ..QueueConfig::default()
        }
    }

    async fn manager(config: QueueConfig) -> ConsumerManager {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.create_queue(&EndpointConfig::new("orders", "us-east-1"));
        cloud.create_queue(&EndpointConfig::new("refunds", "us-east-1"));
        let registry = Arc::new(ClientRegistry::new(cloud));
        registry.start(&config).await.unwrap();
        let handlers = HandlerRegistry::new().with("log", Arc::new(LoggingHandler));
        ConsumerManager::new(config, registry, handlers)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expands_concurrency_per_endpoint() {
        let manager = manager(queue_config("log", 3)).await;
        manager.start().unwrap();
        assert_eq!(manager.worker_count(), 6);

        let names: Vec<String> = manager.breaker_states().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"sqs-orders-0".to_string()));
        assert!(names.contains(&"sqs-refunds-2".to_string()));

        // Starting twice does not double the pool.
        manager.start().unwrap();
        assert_eq!(manager.worker_count(), 6);

        let workers = manager.workers();
        manager.stop().await;
        assert_eq!(manager.worker_count(), 0);
        assert!(workers.iter().all(|w| w.state() == WorkerState::Stopped));
    }

    #[tokio::test]
    async fn test_unknown_handler_is_fatal() {
        let manager = manager(queue_config("missing", 1)).await;
        let err = manager.start().unwrap_err();
        assert!(matches!(err, StartupError::UnknownHandler { ref handler } if handler == "missing"));
        assert_eq!(manager.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_module_is_noop() {
        let mut config = queue_config("missing", 1);
        config.enabled = false;
        let manager = manager(config).await;
        manager.start().unwrap();
        assert_eq!(manager.worker_count(), 0);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_force_every_breaker() {
        let manager = manager(queue_config("log", 1)).await;
        manager.start().unwrap();

        manager.pause();
        assert!(manager
            .breaker_states()
            .iter()
            .all(|(_, s)| *s == CircuitState::Open));

        manager.resume();
        assert!(manager
            .breaker_states()
            .iter()
            .all(|(_, s)| *s == CircuitState::Closed));

        manager.stop().await;
    }
}
