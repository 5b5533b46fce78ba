//! Breaker-protected notification service with endpoint failover.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::NotificationConfig;
use crate::notification::failover::FailoverSelector;
use crate::observability::metrics;
use crate::resilience::{classifier, CircuitBreaker, CircuitBreakerError};
use crate::transport::notification::{
    Attributes, CreatePlatformEndpointRequest, CreatePlatformEndpointResponse, CreateTopicResponse,
    Page, PublishRequest, PublishResponse, SubscribeRequest, SubscribeResponse, Subscription,
};
use crate::transport::{BackendError, BackendResult, NotificationClient, NotificationClientProvider};

/// Name of the breaker shared by every notification call.
pub const BREAKER_NAME: &str = "sns";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    /// The module is disabled; callers must check `is_enabled` first.
    #[error("Notification service is disabled")]
    Disabled,

    #[error("Notification service is enabled but has no endpoints")]
    NoEndpoints,

    #[error("Failed to connect notification client for {key}: {source}")]
    Connect {
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("Circuit breaker is open for {name}")]
    CircuitOpen { name: String },

    #[error(transparent)]
    Backend(BackendError),
}

impl From<CircuitBreakerError> for NotificationError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open { name } => NotificationError::CircuitOpen { name },
            CircuitBreakerError::Backend(e) => NotificationError::Backend(e),
        }
    }
}

/// Routes every call to the active client under one shared breaker.
///
/// The breaker only counts server-side failures. Each Closed → Open
/// transition moves the active client one position down the list.
pub struct NotificationService {
    selector: Option<Arc<FailoverSelector>>,
    breaker: Arc<CircuitBreaker>,
}

impl NotificationService {
    /// Connect every configured endpoint. A disabled module connects nothing.
    pub fn new(
        config: &NotificationConfig,
        provider: &dyn NotificationClientProvider,
    ) -> Result<Self, NotificationError> {
        let breaker = Arc::new(CircuitBreaker::with_classifier(
            BREAKER_NAME,
            config.breaker.clone(),
            classifier::server_errors_only(),
        ));

        if !config.enabled {
            info!("Notification module disabled");
            return Ok(Self {
                selector: None,
                breaker,
            });
        }

        let clients = config
            .endpoints
            .iter()
            .map(|endpoint| {
                provider.connect(endpoint).map_err(|source| NotificationError::Connect {
                    key: endpoint.cache_key(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let selector = Arc::new(FailoverSelector::new(clients).ok_or(NotificationError::NoEndpoints)?);

        let rotating = selector.clone();
        breaker.on_state_transition(move |t| {
            if !t.is_closed_to_open() {
                return;
            }
            if let Some(index) = rotating.rotate() {
                warn!(breaker = BREAKER_NAME, active = index, "Notification endpoint failed over");
                metrics::record_failover();
            }
        });

        info!(endpoints = selector.len(), "Notification service started");
        Ok(Self {
            selector: Some(selector),
            breaker,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.selector.is_some()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Position of the active client, `None` when disabled.
    pub fn active_index(&self) -> Option<usize> {
        self.selector.as_ref().map(|s| s.active_index())
    }

    /// Move to the next client without touching the breaker.
    pub fn trigger_failover(&self) {
        let Some(selector) = &self.selector else {
            return;
        };
        match selector.rotate() {
            Some(index) => {
                info!(active = index, "Notification failover triggered");
                metrics::record_failover();
            }
            None => info!("Notification failover requested with a single endpoint; ignored"),
        }
    }

    /// Shut every client down.
    pub fn shutdown(&self) {
        if let Some(selector) = &self.selector {
            info!("Shutting down notification clients");
            for client in selector.clients() {
                client.shutdown();
            }
        }
    }

    /// Run `operation` against the active client under the shared breaker.
    async fn protected<T, F, Fut>(&self, name: &'static str, operation: F) -> Result<T, NotificationError>
    where
        F: FnOnce(Arc<dyn NotificationClient>) -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let selector = self.selector.as_ref().ok_or(NotificationError::Disabled)?;
        let client = selector.active();
        let result = self.breaker.call(|| operation(client)).await;
        metrics::record_notification_call(name, result.is_ok());
        result.map_err(NotificationError::from)
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, NotificationError> {
        trace!(topic_arn = ?request.topic_arn, target_arn = ?request.target_arn, "Publishing notification");
        self.protected("publish", |c| async move { c.publish(request).await })
            .await
    }

    pub async fn create_topic(&self, name: &str) -> Result<CreateTopicResponse, NotificationError> {
        trace!(topic = name, "Creating topic");
        self.protected("create_topic", |c| async move { c.create_topic(name).await })
            .await
    }

    pub async fn delete_topic(&self, topic_arn: &str) -> Result<(), NotificationError> {
        debug!(topic_arn, "Deleting topic");
        self.protected("delete_topic", |c| async move { c.delete_topic(topic_arn).await })
            .await
    }

    pub async fn list_topics(&self, next_token: Option<String>) -> Result<Page<String>, NotificationError> {
        self.protected("list_topics", |c| async move { c.list_topics(next_token).await })
            .await
    }

    pub async fn get_topic_attributes(&self, topic_arn: &str) -> Result<Attributes, NotificationError> {
        self.protected("get_topic_attributes", |c| async move {
            c.get_topic_attributes(topic_arn).await
        })
        .await
    }

    pub async fn set_topic_attributes(
        &self,
        topic_arn: &str,
        name: &str,
        value: &str,
    ) -> Result<(), NotificationError> {
        self.protected("set_topic_attributes", |c| async move {
            c.set_topic_attributes(topic_arn, name, value).await
        })
        .await
    }

    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscribeResponse, NotificationError> {
        trace!(topic_arn = %request.topic_arn, protocol = %request.protocol, "Subscribing");
        self.protected("subscribe", |c| async move { c.subscribe(request).await })
            .await
    }

    pub async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), NotificationError> {
        self.protected("unsubscribe", |c| async move { c.unsubscribe(subscription_arn).await })
            .await
    }

    pub async fn confirm_subscription(
        &self,
        topic_arn: &str,
        token: &str,
    ) -> Result<SubscribeResponse, NotificationError> {
        self.protected("confirm_subscription", |c| async move {
            c.confirm_subscription(topic_arn, token).await
        })
        .await
    }

    pub async fn list_subscriptions(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<Subscription>, NotificationError> {
        self.protected("list_subscriptions", |c| async move {
            c.list_subscriptions(next_token).await
        })
        .await
    }

    pub async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<Subscription>, NotificationError> {
        self.protected("list_subscriptions_by_topic", |c| async move {
            c.list_subscriptions_by_topic(topic_arn, next_token).await
        })
        .await
    }

    pub async fn get_subscription_attributes(
        &self,
        subscription_arn: &str,
    ) -> Result<Attributes, NotificationError> {
        self.protected("get_subscription_attributes", |c| async move {
            c.get_subscription_attributes(subscription_arn).await
        })
        .await
    }

    pub async fn set_subscription_attributes(
        &self,
        subscription_arn: &str,
        name: &str,
        value: &str,
    ) -> Result<(), NotificationError> {
        self.protected("set_subscription_attributes", |c| async move {
            c.set_subscription_attributes(subscription_arn, name, value).await
        })
        .await
    }

    pub async fn create_platform_endpoint(
        &self,
        request: CreatePlatformEndpointRequest,
    ) -> Result<CreatePlatformEndpointResponse, NotificationError> {
        self.protected("create_platform_endpoint", |c| async move {
            c.create_platform_endpoint(request).await
        })
        .await
    }

    pub async fn delete_endpoint(&self, endpoint_arn: &str) -> Result<(), NotificationError> {
        self.protected("delete_endpoint", |c| async move { c.delete_endpoint(endpoint_arn).await })
            .await
    }

    pub async fn get_endpoint_attributes(&self, endpoint_arn: &str) -> Result<Attributes, NotificationError> {
        self.protected("get_endpoint_attributes", |c| async move {
            c.get_endpoint_attributes(endpoint_arn).await
        })
        .await
    }

    pub async fn set_endpoint_attributes(
        &self,
        endpoint_arn: &str,
        attributes: Attributes,
    ) -> Result<(), NotificationError> {
        self.protected("set_endpoint_attributes", |c| async move {
            c.set_endpoint_attributes(endpoint_arn, attributes).await
        })
        .await
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("selector", &self.selector)
            .field("breaker", &self.breaker.state())
            .finish()
    }
}
