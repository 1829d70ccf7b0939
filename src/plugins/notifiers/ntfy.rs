use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::PushConfig;
use crate::plugins::traits::{NotificationResult, PushMessage, PushSender};
use crate::utils::{AppError, Result};

/// Publishes plain-text pushes to an ntfy server.
pub struct NtfyNotifier {
    client: Client,
    base_url: String,
}

impl NtfyNotifier {
    pub fn new(config: &PushConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PushSender for NtfyNotifier {
    fn name(&self) -> &str {
        "ntfy"
    }

    async fn push(&self, message: &PushMessage) -> Result<NotificationResult> {
        let url = format!("{}/{}", self.base_url, message.topic);
        let response = self
            .client
            .post(&url)
            .header("Title", &message.title)
            .header("Priority", &message.priority)
            .body(message.body.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notification {
                channel: self.name().to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
            });
        }

        // ntfy answers with the published message as JSON.
        let id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string));
        Ok(NotificationResult::sent(id))
    }
}
