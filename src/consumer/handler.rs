//! Message handler contract and registry.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;

use crate::transport::{Message, ReceiveRequest};

/// Error type handlers may return; anything displayable works.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Application logic invoked for each received message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. An error is logged and does not stop the worker.
    async fn consume(&self, message: &Message) -> Result<(), HandlerError>;

    /// The receive request this handler wants. Defaults to a 20 second long-poll.
    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest::long_poll()
    }
}

/// Maps configuration-level handler identifiers to handler instances.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `id`, replacing any previous registration.
    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn MessageHandler>) -> &mut Self {
        self.handlers.insert(id.into(), handler);
        self
    }

    pub fn with(mut self, id: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.register(id, handler);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.ids().collect();
        ids.sort_unstable();
        f.debug_struct("HandlerRegistry").field("handlers", &ids).finish()
    }
}

/// Handler that logs every message body. Registered by the binary as `log`.
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn consume(&self, message: &Message) -> Result<(), HandlerError> {
        tracing::info!(message_id = %message.message_id, body = %message.body, "Message received");
        Ok(())
    }
}
