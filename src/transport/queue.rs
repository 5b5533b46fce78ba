//! Queue message and request types.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Default long-poll wait requested by handlers that do not customise it.
pub const DEFAULT_WAIT_TIME_SECS: u32 = 20;

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Backend-assigned message identifier.
    pub message_id: String,
    /// Handle used to delete this particular receipt of the message.
    pub receipt_handle: String,
    /// Message payload.
    pub body: String,
    /// System attributes requested through `attribute_names`.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Application attributes set by the sender.
    #[serde(default)]
    pub message_attributes: HashMap<String, String>,
}

/// Parameters of a receive call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceiveRequest {
    /// Destination queue address. Injected by the worker when absent.
    pub queue_url: Option<String>,
    /// Long-poll wait in seconds.
    pub wait_time_secs: Option<u32>,
    /// Maximum batch size.
    pub max_messages: Option<u32>,
    /// Seconds a received message stays hidden from other receivers.
    pub visibility_timeout_secs: Option<u32>,
    /// System attributes to return with each message.
    pub attribute_names: Vec<String>,
    /// Application attributes to return with each message.
    pub message_attribute_names: Vec<String>,
}

impl ReceiveRequest {
    /// The request used when a handler does not override it: a 20 second long-poll.
    pub fn long_poll() -> Self {
        Self {
            wait_time_secs: Some(DEFAULT_WAIT_TIME_SECS),
            ..Self::default()
        }
    }

    pub fn with_queue_url(mut self, queue_url: impl Into<String>) -> Self {
        self.queue_url = Some(queue_url.into());
        self
    }

    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = Some(max);
        self
    }

    pub fn with_wait_time_secs(mut self, secs: u32) -> Self {
        self.wait_time_secs = Some(secs);
        self
    }

    /// True when the request has no usable destination address.
    pub fn needs_queue_url(&self) -> bool {
        self.queue_url.as_deref().map_or(true, str::is_empty)
    }
}

/// Parameters of a send call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub body: String,
    pub delay_secs: Option<u32>,
    pub message_attributes: HashMap<String, String>,
}

/// Result of a send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: String,
}
