//! In-process queue and notification backend.
//!
//! A `MemoryCloud` holds one `MemoryBroker` per `region:endpoint` key. A
//! broker serves both capabilities, so a topic can fan out to queues that
//! live on the same key. Addresses are stable strings:
//!
//! ```text
//! queue url      memory://{key}/{queue}
//! topic arn      arn:memory:{key}:{topic}
//! subscription   {topic arn}:{uuid}
//! ```
//!
//! `fail_next(n, status)` makes the next `n` calls of either capability fail,
//! which is how tests drive breakers open.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{EndpointConfig, NotificationEndpointConfig};
use crate::transport::notification::{
    Attributes, CreatePlatformEndpointRequest, CreatePlatformEndpointResponse, CreateTopicResponse,
    Page, PublishRequest, PublishResponse, SubscribeRequest, SubscribeResponse, Subscription,
};
use crate::transport::{
    BackendError, BackendResult, Message, NotificationClient, NotificationClientProvider, QueueClient,
    QueueClientProvider, ReceiveRequest, SendMessageRequest, SendMessageResponse,
};

/// Seconds a received message stays invisible when the request does not say.
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u32 = 30;

const MAX_BATCH: u32 = 10;

const PAGE_SIZE: usize = 100;

/// Registry of in-memory brokers, keyed like real clients.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    brokers: DashMap<String, Arc<MemoryBroker>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// The broker for `key`, created on first use.
    pub fn broker(&self, key: &str) -> Arc<MemoryBroker> {
        self.brokers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(MemoryBroker::new(key)))
            .value()
            .clone()
    }

    /// Create `endpoint`'s queue and return its url.
    pub fn create_queue(&self, endpoint: &EndpointConfig) -> String {
        self.broker(&endpoint.cache_key()).ensure_queue(&endpoint.queue_name)
    }
}

impl QueueClientProvider for MemoryCloud {
    fn connect(&self, endpoint: &EndpointConfig) -> BackendResult<Arc<dyn QueueClient>> {
        let broker: Arc<dyn QueueClient> = self.broker(&endpoint.cache_key());
        Ok(broker)
    }
}

impl NotificationClientProvider for MemoryCloud {
    fn connect(&self, endpoint: &NotificationEndpointConfig) -> BackendResult<Arc<dyn NotificationClient>> {
        let broker: Arc<dyn NotificationClient> = self.broker(&endpoint.cache_key());
        Ok(broker)
    }
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    message_attributes: HashMap<String, String>,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    messages: VecDeque<StoredMessage>,
}

#[derive(Debug, Default)]
struct TopicRecord {
    attributes: Attributes,
}

#[derive(Debug)]
struct SubscriptionRecord {
    topic_arn: String,
    protocol: String,
    endpoint: String,
    confirmed: bool,
    attributes: Attributes,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: BTreeMap<String, MemoryQueue>,
    topics: BTreeMap<String, TopicRecord>,
    subscriptions: BTreeMap<String, SubscriptionRecord>,
    platform_endpoints: BTreeMap<String, Attributes>,
    failures_remaining: u32,
    failure_status: u16,
}

/// One in-memory backend endpoint.
#[derive(Debug)]
pub struct MemoryBroker {
    key: String,
    state: Mutex<BrokerState>,
    arrivals: Notify,
    calls: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(BrokerState::default()),
            arrivals: Notify::new(),
            calls: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn queue_url(&self, queue_name: &str) -> String {
        format!("memory://{}/{}", self.key, queue_name)
    }

    pub fn topic_arn(&self, topic_name: &str) -> String {
        format!("arn:memory:{}:{}", self.key, topic_name)
    }

    /// Fail the next `count` calls with `status`.
    pub fn fail_next(&self, count: u32, status: u16) {
        let mut state = self.lock();
        state.failures_remaining = count;
        state.failure_status = status;
    }

    /// Calls made against this broker, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Times a notification client on this broker was shut down.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Messages in the queue, invisible ones included.
    pub fn queue_depth(&self, queue_url: &str) -> usize {
        self.lock().queues.get(queue_url).map_or(0, |q| q.messages.len())
    }

    fn ensure_queue(&self, queue_name: &str) -> String {
        let url = self.queue_url(queue_name);
        self.lock().queues.entry(url.clone()).or_default();
        url
    }

    /// Count the call and consume one injected failure, if any.
    fn enter(&self) -> BackendResult<MutexGuard<'_, BrokerState>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(BackendError::with_status("injected failure", state.failure_status));
        }
        Ok(state)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take up to `max` visible messages, hiding them for `visibility`.
    /// Returns the batch and, when empty, the next instant a message turns visible.
    fn take_visible(
        &self,
        queue_url: &str,
        max: u32,
        visibility: Duration,
        want_receive_count: bool,
    ) -> BackendResult<(Vec<Message>, Option<Instant>)> {
        let mut state = self.lock();
        let queue = state.queues.get_mut(queue_url).ok_or_else(|| no_such_queue(queue_url))?;
        let now = Instant::now();

        let mut batch = Vec::new();
        for stored in queue.messages.iter_mut() {
            if batch.len() as u32 >= max {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            stored.receipt_handle = Some(receipt.clone());
            stored.visible_at = now + visibility;
            stored.receive_count += 1;

            let mut attributes = HashMap::new();
            if want_receive_count {
                attributes.insert("ApproximateReceiveCount".to_string(), stored.receive_count.to_string());
            }
            batch.push(Message {
                message_id: stored.message_id.clone(),
                receipt_handle: receipt,
                body: stored.body.clone(),
                attributes,
                message_attributes: stored.message_attributes.clone(),
            });
        }

        let next_visible = if batch.is_empty() {
            queue.messages.iter().map(|m| m.visible_at).min()
        } else {
            None
        };
        Ok((batch, next_visible))
    }

    fn enqueue(
        state: &mut BrokerState,
        queue_url: &str,
        body: String,
        delay: Duration,
        message_attributes: HashMap<String, String>,
    ) -> BackendResult<String> {
        let queue = state.queues.get_mut(queue_url).ok_or_else(|| no_such_queue(queue_url))?;
        let message_id = Uuid::new_v4().to_string();
        queue.messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            message_attributes,
            visible_at: Instant::now() + delay,
            receipt_handle: None,
            receive_count: 0,
        });
        Ok(message_id)
    }
}

fn no_such_queue(queue_url: &str) -> BackendError {
    BackendError::with_status(format!("queue does not exist: {}", queue_url), 400)
}

fn not_found(kind: &str, arn: &str) -> BackendError {
    BackendError::with_status(format!("{} not found: {}", kind, arn), 404)
}

fn paginate<T>(items: Vec<T>, next_token: Option<String>) -> BackendResult<Page<T>> {
    let start = match next_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| BackendError::with_status(format!("invalid next token: {}", token), 400))?,
        None => 0,
    };
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(start).take(PAGE_SIZE).collect();
    let end = start + items.len();
    Ok(Page {
        items,
        next_token: (end < total).then(|| end.to_string()),
    })
}

fn subscription_view(arn: &str, record: &SubscriptionRecord) -> Subscription {
    Subscription {
        subscription_arn: arn.to_string(),
        topic_arn: record.topic_arn.clone(),
        protocol: record.protocol.clone(),
        endpoint: record.endpoint.clone(),
    }
}

#[async_trait]
impl QueueClient for MemoryBroker {
    async fn get_queue_url(&self, queue_name: &str) -> BackendResult<String> {
        let state = self.enter()?;
        let url = self.queue_url(queue_name);
        if state.queues.contains_key(&url) {
            Ok(url)
        } else {
            Err(no_such_queue(&url))
        }
    }

    async fn create_queue(&self, queue_name: &str) -> BackendResult<String> {
        let mut state = self.enter()?;
        let url = self.queue_url(queue_name);
        state.queues.entry(url.clone()).or_default();
        Ok(url)
    }

    async fn receive_messages(&self, request: ReceiveRequest) -> BackendResult<Vec<Message>> {
        drop(self.enter()?);
        let queue_url = request
            .queue_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BackendError::with_status("queue url is required", 400))?;
        let max = request.max_messages.unwrap_or(1).clamp(1, MAX_BATCH);
        let visibility = Duration::from_secs(
            request
                .visibility_timeout_secs
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SECS) as u64,
        );
        let want_receive_count = request
            .attribute_names
            .iter()
            .any(|n| n == "All" || n == "ApproximateReceiveCount");
        let deadline = Instant::now() + Duration::from_secs(request.wait_time_secs.unwrap_or(0) as u64);

        loop {
            // Registered before checking, so a send in between is not missed.
            let arrival = self.arrivals.notified();
            let (batch, next_visible) = self.take_visible(&queue_url, max, visibility, want_receive_count)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> BackendResult<()> {
        let mut state = self.enter()?;
        let queue = state.queues.get_mut(queue_url).ok_or_else(|| no_such_queue(queue_url))?;
        // Deleting with a stale receipt is not an error.
        queue
            .messages
            .retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        Ok(())
    }

    async fn send_message(&self, request: SendMessageRequest) -> BackendResult<SendMessageResponse> {
        let message_id = {
            let mut state = self.enter()?;
            let delay = Duration::from_secs(request.delay_secs.unwrap_or(0) as u64);
            Self::enqueue(
                &mut state,
                &request.queue_url,
                request.body,
                delay,
                request.message_attributes,
            )?
        };
        self.arrivals.notify_waiters();
        Ok(SendMessageResponse { message_id })
    }
}

#[async_trait]
impl NotificationClient for MemoryBroker {
    async fn publish(&self, request: PublishRequest) -> BackendResult<PublishResponse> {
        let message_id = Uuid::new_v4().to_string();
        let mut state = self.enter()?;

        match (&request.topic_arn, &request.target_arn) {
            (Some(topic_arn), _) => {
                if !state.topics.contains_key(topic_arn) {
                    return Err(not_found("topic", topic_arn));
                }
                let envelope = serde_json::json!({
                    "Type": "Notification",
                    "MessageId": message_id,
                    "TopicArn": topic_arn,
                    "Subject": request.subject,
                    "Message": request.message,
                })
                .to_string();

                let targets: Vec<(String, bool)> = state
                    .subscriptions
                    .values()
                    .filter(|s| &s.topic_arn == topic_arn && s.confirmed && s.protocol == "sqs")
                    .map(|s| {
                        let raw = s.attributes.get("RawMessageDelivery").map_or(false, |v| v == "true");
                        (s.endpoint.clone(), raw)
                    })
                    .collect();
                for (queue_url, raw) in targets {
                    let body = if raw { request.message.clone() } else { envelope.clone() };
                    // Subscriptions to queues that no longer exist are skipped.
                    let _ = Self::enqueue(
                        &mut state,
                        &queue_url,
                        body,
                        Duration::ZERO,
                        request.message_attributes.clone(),
                    );
                }
            }
            (None, Some(target_arn)) => {
                if !state.platform_endpoints.contains_key(target_arn) {
                    return Err(not_found("endpoint", target_arn));
                }
            }
            (None, None) => {
                return Err(BackendError::with_status("topic or target arn is required", 400));
            }
        }

        drop(state);
        self.arrivals.notify_waiters();
        Ok(PublishResponse { message_id })
    }

    async fn create_topic(&self, name: &str) -> BackendResult<CreateTopicResponse> {
        let mut state = self.enter()?;
        let topic_arn = self.topic_arn(name);
        state.topics.entry(topic_arn.clone()).or_insert_with(|| {
            let mut attributes = Attributes::new();
            attributes.insert("TopicArn".to_string(), topic_arn.clone());
            attributes.insert("DisplayName".to_string(), String::new());
            TopicRecord { attributes }
        });
        Ok(CreateTopicResponse { topic_arn })
    }

    async fn delete_topic(&self, topic_arn: &str) -> BackendResult<()> {
        let mut state = self.enter()?;
        state.topics.remove(topic_arn);
        state.subscriptions.retain(|_, s| s.topic_arn != topic_arn);
        Ok(())
    }

    async fn list_topics(&self, next_token: Option<String>) -> BackendResult<Page<String>> {
        let state = self.enter()?;
        paginate(state.topics.keys().cloned().collect(), next_token)
    }

    async fn get_topic_attributes(&self, topic_arn: &str) -> BackendResult<Attributes> {
        let state = self.enter()?;
        let topic = state.topics.get(topic_arn).ok_or_else(|| not_found("topic", topic_arn))?;
        let mut attributes = topic.attributes.clone();
        let confirmed = state
            .subscriptions
            .values()
            .filter(|s| s.topic_arn == topic_arn && s.confirmed)
            .count();
        attributes.insert("SubscriptionsConfirmed".to_string(), confirmed.to_string());
        Ok(attributes)
    }

    async fn set_topic_attributes(&self, topic_arn: &str, name: &str, value: &str) -> BackendResult<()> {
        let mut state = self.enter()?;
        let topic = state
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| not_found("topic", topic_arn))?;
        topic.attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn subscribe(&self, request: SubscribeRequest) -> BackendResult<SubscribeResponse> {
        let mut state = self.enter()?;
        if !state.topics.contains_key(&request.topic_arn) {
            return Err(not_found("topic", &request.topic_arn));
        }
        let subscription_arn = format!("{}:{}", request.topic_arn, Uuid::new_v4());
        // Queue subscriptions need no confirmation round-trip.
        let confirmed = request.protocol == "sqs";
        state.subscriptions.insert(
            subscription_arn.clone(),
            SubscriptionRecord {
                topic_arn: request.topic_arn,
                protocol: request.protocol,
                endpoint: request.endpoint,
                confirmed,
                attributes: Attributes::new(),
            },
        );
        Ok(SubscribeResponse { subscription_arn })
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> BackendResult<()> {
        let mut state = self.enter()?;
        state
            .subscriptions
            .remove(subscription_arn)
            .map(|_| ())
            .ok_or_else(|| not_found("subscription", subscription_arn))
    }

    /// The confirmation token of a memory subscription is its arn.
    async fn confirm_subscription(&self, topic_arn: &str, token: &str) -> BackendResult<SubscribeResponse> {
        let mut state = self.enter()?;
        match state.subscriptions.get_mut(token) {
            Some(record) if record.topic_arn == topic_arn => {
                record.confirmed = true;
                Ok(SubscribeResponse {
                    subscription_arn: token.to_string(),
                })
            }
            _ => Err(BackendError::with_status("invalid confirmation token", 400)),
        }
    }

    async fn list_subscriptions(&self, next_token: Option<String>) -> BackendResult<Page<Subscription>> {
        let state = self.enter()?;
        let all = state
            .subscriptions
            .iter()
            .map(|(arn, record)| subscription_view(arn, record))
            .collect();
        paginate(all, next_token)
    }

    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<String>,
    ) -> BackendResult<Page<Subscription>> {
        let state = self.enter()?;
        if !state.topics.contains_key(topic_arn) {
            return Err(not_found("topic", topic_arn));
        }
        let matching = state
            .subscriptions
            .iter()
            .filter(|(_, record)| record.topic_arn == topic_arn)
            .map(|(arn, record)| subscription_view(arn, record))
            .collect();
        paginate(matching, next_token)
    }

    async fn get_subscription_attributes(&self, subscription_arn: &str) -> BackendResult<Attributes> {
        let state = self.enter()?;
        let record = state
            .subscriptions
            .get(subscription_arn)
            .ok_or_else(|| not_found("subscription", subscription_arn))?;
        let mut attributes = record.attributes.clone();
        attributes.insert("SubscriptionArn".to_string(), subscription_arn.to_string());
        attributes.insert("TopicArn".to_string(), record.topic_arn.clone());
        attributes.insert("Protocol".to_string(), record.protocol.clone());
        attributes.insert("Endpoint".to_string(), record.endpoint.clone());
        attributes.insert("PendingConfirmation".to_string(), (!record.confirmed).to_string());
        Ok(attributes)
    }

    async fn set_subscription_attributes(
        &self,
        subscription_arn: &str,
        name: &str,
        value: &str,
    ) -> BackendResult<()> {
        let mut state = self.enter()?;
        let record = state
            .subscriptions
            .get_mut(subscription_arn)
            .ok_or_else(|| not_found("subscription", subscription_arn))?;
        record.attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn create_platform_endpoint(
        &self,
        request: CreatePlatformEndpointRequest,
    ) -> BackendResult<CreatePlatformEndpointResponse> {
        let mut state = self.enter()?;
        let endpoint_arn = format!("{}/endpoint/{}", request.platform_application_arn, Uuid::new_v4());
        let mut attributes = request.attributes;
        attributes.insert("Token".to_string(), request.token);
        attributes.entry("Enabled".to_string()).or_insert_with(|| "true".to_string());
        if let Some(data) = request.custom_user_data {
            attributes.insert("CustomUserData".to_string(), data);
        }
        state.platform_endpoints.insert(endpoint_arn.clone(), attributes);
        Ok(CreatePlatformEndpointResponse { endpoint_arn })
    }

    async fn delete_endpoint(&self, endpoint_arn: &str) -> BackendResult<()> {
        let mut state = self.enter()?;
        state.platform_endpoints.remove(endpoint_arn);
        Ok(())
    }

    async fn get_endpoint_attributes(&self, endpoint_arn: &str) -> BackendResult<Attributes> {
        let state = self.enter()?;
        state
            .platform_endpoints
            .get(endpoint_arn)
            .cloned()
            .ok_or_else(|| not_found("endpoint", endpoint_arn))
    }

    async fn set_endpoint_attributes(&self, endpoint_arn: &str, attributes: Attributes) -> BackendResult<()> {
        let mut state = self.enter()?;
        let existing = state
            .platform_endpoints
            .get_mut(endpoint_arn)
            .ok_or_else(|| not_found("endpoint", endpoint_arn))?;
        existing.extend(attributes);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
