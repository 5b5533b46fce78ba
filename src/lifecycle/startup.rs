//! Startup orchestration.
//!
//! # Order
//! 1. Client registry (queue clients and writers)
//! 2. Notification service (connects its failover list)
//! 3. Consumer pool (spawns workers last, once everything they use exists)
//!
//! Any startup error is fatal. Stopping runs in reverse: the pool drains
//! first, then notification clients are shut down.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;
use crate::consumer::{ClientRegistry, ConsumerManager, HandlerRegistry, RegistryError, StartupError};
use crate::lifecycle::signals::{ControlSignal, SignalListener};
use crate::notification::{NotificationError, NotificationService};
use crate::transport::{NotificationClientProvider, QueueClientProvider};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("Queue client registry failed to start: {0}")]
    Registry(#[from] RegistryError),

    #[error("Notification service failed to start: {0}")]
    Notifications(#[from] NotificationError),

    #[error("Consumer pool failed to start: {0}")]
    Consumers(#[from] StartupError),
}

/// The running engine: registry, notification service and consumer pool.
#[derive(Debug)]
pub struct Application {
    registry: Arc<ClientRegistry>,
    notifications: NotificationService,
    consumers: ConsumerManager,
}

impl Application {
    /// Start every subsystem in dependency order.
    pub async fn start(
        config: AppConfig,
        queue_provider: Arc<dyn QueueClientProvider>,
        notification_provider: &dyn NotificationClientProvider,
        handlers: HandlerRegistry,
    ) -> Result<Self, ApplicationError> {
        let registry = Arc::new(ClientRegistry::new(queue_provider));
        registry.start(&config.queues).await?;

        let notifications = NotificationService::new(&config.notifications, notification_provider)?;

        let consumers = ConsumerManager::new(config.queues, registry.clone(), handlers);
        consumers.start()?;

        info!(
            workers = consumers.worker_count(),
            notifications = notifications.is_enabled(),
            "Application started"
        );
        Ok(Self {
            registry,
            notifications,
            consumers,
        })
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn consumers(&self) -> &ConsumerManager {
        &self.consumers
    }

    /// Apply an operator action. Returns `false` once shutdown was requested.
    pub fn handle(&self, signal: ControlSignal) -> bool {
        match signal {
            ControlSignal::Shutdown => return false,
            ControlSignal::Pause => self.consumers.pause(),
            ControlSignal::Resume => self.consumers.resume(),
            ControlSignal::Failover => self.notifications.trigger_failover(),
        }
        true
    }

    /// Serve signals until a shutdown signal arrives, then stop.
    pub async fn run(&self, signals: &mut SignalListener) {
        while self.handle(signals.recv().await) {}
        self.stop().await;
    }

    /// Drain the consumer pool, then release notification clients.
    pub async fn stop(&self) {
        info!("Application stopping");
        self.consumers.stop().await;
        self.notifications.shutdown();
        info!("Application stopped");
    }
}
