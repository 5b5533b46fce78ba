//! Topic, subscription and platform-endpoint request types.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Publish a message to a topic (or directly to a platform endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic_arn: Option<String>,
    pub target_arn: Option<String>,
    pub subject: Option<String>,
    pub message: String,
    pub message_attributes: HashMap<String, String>,
}

impl PublishRequest {
    pub fn to_topic(topic_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic_arn: Some(topic_arn.into()),
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTopicResponse {
    pub topic_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic_arn: String,
    /// Delivery protocol, e.g. `sqs`, `https`, `email`.
    pub protocol: String,
    /// Protocol-specific destination.
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub subscription_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePlatformEndpointRequest {
    pub platform_application_arn: String,
    pub token: String,
    pub custom_user_data: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePlatformEndpointResponse {
    pub endpoint_arn: String,
}

/// Attribute map returned by the various `get_*_attributes` calls.
pub type Attributes = HashMap<String, String>;
