//! Transport seam.
//!
//! # Data Flow
//! ```text
//! EndpointConfig
//!     → QueueClientProvider::connect → Arc<dyn QueueClient>
//!         → consumer::worker (receive / delete)
//!         → producer::writer (send)
//!
//! NotificationEndpointConfig
//!     → NotificationClientProvider::connect → Arc<dyn NotificationClient>
//!         → notification::NotificationService (active client, failover)
//! ```
//!
//! # Design Decisions
//! - Concrete wire protocols live behind these traits; the engine never sees them
//! - Every call fails with the same `BackendError`, so breakers classify uniformly
//! - `memory` provides a complete in-process implementation of both capabilities

pub mod error;
pub mod memory;
pub mod notification;
pub mod queue;

use std::sync::Arc;
use async_trait::async_trait;

use crate::config::{EndpointConfig, NotificationEndpointConfig};
pub use error::{BackendError, BackendResult};
use notification::{
    Attributes, CreatePlatformEndpointRequest, CreatePlatformEndpointResponse, CreateTopicResponse,
    Page, PublishRequest, PublishResponse, SubscribeRequest, SubscribeResponse, Subscription,
};
pub use queue::{Message, ReceiveRequest, SendMessageRequest, SendMessageResponse};

/// Queue operations against one resolved backend endpoint.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Resolve a logical queue name to the address used by the other calls.
    async fn get_queue_url(&self, queue_name: &str) -> BackendResult<String>;

    /// Create a queue (idempotent) and return its address.
    async fn create_queue(&self, queue_name: &str) -> BackendResult<String>;

    /// Receive a (possibly empty) batch, long-polling up to the request's wait time.
    async fn receive_messages(&self, request: ReceiveRequest) -> BackendResult<Vec<Message>>;

    /// Delete one receipt of a message.
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> BackendResult<()>;

    async fn send_message(&self, request: SendMessageRequest) -> BackendResult<SendMessageResponse>;
}

/// Topic and subscription management against one resolved backend endpoint.
#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> BackendResult<PublishResponse>;

    async fn create_topic(&self, name: &str) -> BackendResult<CreateTopicResponse>;

    async fn delete_topic(&self, topic_arn: &str) -> BackendResult<()>;

    async fn list_topics(&self, next_token: Option<String>) -> BackendResult<Page<String>>;

    async fn get_topic_attributes(&self, topic_arn: &str) -> BackendResult<Attributes>;

    async fn set_topic_attributes(&self, topic_arn: &str, name: &str, value: &str) -> BackendResult<()>;

    async fn subscribe(&self, request: SubscribeRequest) -> BackendResult<SubscribeResponse>;

    async fn unsubscribe(&self, subscription_arn: &str) -> BackendResult<()>;

    async fn confirm_subscription(&self, topic_arn: &str, token: &str) -> BackendResult<SubscribeResponse>;

    async fn list_subscriptions(&self, next_token: Option<String>) -> BackendResult<Page<Subscription>>;

    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<String>,
    ) -> BackendResult<Page<Subscription>>;

    async fn get_subscription_attributes(&self, subscription_arn: &str) -> BackendResult<Attributes>;

    async fn set_subscription_attributes(
        &self,
        subscription_arn: &str,
        name: &str,
        value: &str,
    ) -> BackendResult<()>;

    async fn create_platform_endpoint(
        &self,
        request: CreatePlatformEndpointRequest,
    ) -> BackendResult<CreatePlatformEndpointResponse>;

    async fn delete_endpoint(&self, endpoint_arn: &str) -> BackendResult<()>;

    async fn get_endpoint_attributes(&self, endpoint_arn: &str) -> BackendResult<Attributes>;

    async fn set_endpoint_attributes(&self, endpoint_arn: &str, attributes: Attributes) -> BackendResult<()>;

    /// Release connections held by this client.
    fn shutdown(&self) {}
}

/// Builds queue clients for configured endpoints.
pub trait QueueClientProvider: Send + Sync {
    fn connect(&self, endpoint: &EndpointConfig) -> BackendResult<Arc<dyn QueueClient>>;
}

/// Builds notification clients for configured endpoints.
pub trait NotificationClientProvider: Send + Sync {
    fn connect(&self, endpoint: &NotificationEndpointConfig) -> BackendResult<Arc<dyn NotificationClient>>;
}
