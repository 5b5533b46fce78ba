//! Writer bound to a single resolved queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::transport::{BackendResult, QueueClient, SendMessageRequest, SendMessageResponse};

/// Sends messages to one queue whose address was resolved at startup.
pub struct QueueWriter {
    name: String,
    queue_url: String,
    client: Arc<dyn QueueClient>,
}

impl QueueWriter {
    pub fn new(name: impl Into<String>, queue_url: impl Into<String>, client: Arc<dyn QueueClient>) -> Self {
        Self {
            name: name.into(),
            queue_url: queue_url.into(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub async fn send_message(&self, body: impl Into<String>) -> BackendResult<SendMessageResponse> {
        self.send_message_with_attributes(body, None, HashMap::new()).await
    }

    pub async fn send_message_with_delay(
        &self,
        body: impl Into<String>,
        delay_secs: u32,
    ) -> BackendResult<SendMessageResponse> {
        self.send_message_with_attributes(body, Some(delay_secs), HashMap::new())
            .await
    }

    /// Send with an optional delay and message attributes.
    pub async fn send_message_with_attributes(
        &self,
        body: impl Into<String>,
        delay_secs: Option<u32>,
        attributes: HashMap<String, String>,
    ) -> BackendResult<SendMessageResponse> {
        let request = SendMessageRequest {
            queue_url: self.queue_url.clone(),
            body: body.into(),
            delay_secs,
            message_attributes: attributes,
        };
        tracing::trace!(writer = %self.name, queue_url = %self.queue_url, "Sending message");
        self.client.send_message(request).await
    }
}

impl fmt::Debug for QueueWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueWriter")
            .field("name", &self.name)
            .field("queue_url", &self.queue_url)
            .finish()
    }
}
