use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }
}

/// A webhook-style push addressed by topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub topic: String,
    pub title: String,
    pub body: String,
    pub priority: String,
}

/// Primary per-subscriber channel.
#[async_trait]
pub trait ChatSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, subscriber_id: &str, text: &str) -> Result<NotificationResult>;
}

/// Secondary channel for subscribers that registered a push secret.
#[async_trait]
pub trait PushSender: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, message: &PushMessage) -> Result<NotificationResult>;
}
