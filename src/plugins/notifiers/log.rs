use async_trait::async_trait;

use crate::plugins::traits::{ChatSender, NotificationResult};
use crate::utils::Result;

/// Writes chat messages to the log. Stands in when no bot token is configured.
pub struct LogNotifier;

#[async_trait]
impl ChatSender for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, subscriber_id: &str, text: &str) -> Result<NotificationResult> {
        tracing::info!(subscriber = %subscriber_id, "Chat message (not delivered):\n{}", text);
        Ok(NotificationResult::sent(None))
    }
}
