use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::TelegramConfig;
use crate::plugins::traits::{ChatSender, NotificationResult};
use crate::utils::{AppError, Result};

const CHANNEL: &str = "telegram";
/// Bot API limit for one media group.
pub const MEDIA_GROUP_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug)]
struct ApiError {
    status: Option<StatusCode>,
    message: String,
}

impl ApiError {
    fn transport(e: reqwest::Error) -> Self {
        Self {
            status: e.status(),
            message: e.to_string(),
        }
    }

    /// Transport failures, 5xx and 429 are worth another try.
    fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        AppError::Notification {
            channel: CHANNEL.to_string(),
            message: match e.status {
                Some(status) => format!("HTTP {}: {}", status.as_u16(), e.message),
                None => e.message,
            },
        }
    }
}

/// Thin Bot API client shared by subscriber delivery and operator diagnostics.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    endpoint: String,
    retry_attempts: usize,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| AppError::Validation("Telegram token is not configured".to_string()))?;
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ApiError>>,
    {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.retry_attempts - 1);

        RetryIf::spawn(strategy, || call(), |e: &ApiError| e.is_retryable())
            .await
            .map_err(AppError::from)
    }

    async fn read(response: reqwest::Response) -> std::result::Result<ApiResponse, ApiError> {
        let status = response.status();
        let body: ApiResponse = response.json().await.map_err(|e| ApiError {
            status: Some(status),
            message: format!("unreadable response: {}", e),
        })?;

        if !status.is_success() || !body.ok {
            return Err(ApiError {
                status: Some(status),
                message: body.description.unwrap_or_else(|| "request rejected".to_string()),
            });
        }
        Ok(body)
    }

    /// Returns the sent message id when the API reports one.
    pub async fn send_message(&self, chat_id: &str, text: &str, parse_mode: Option<&str>) -> Result<Option<i64>> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        let url = self.method_url("sendMessage");
        let (url, payload) = (&url, &payload);
        let body = self
            .with_retry(|| async move {
                let response = self
                    .http
                    .post(url)
                    .json(payload)
                    .send()
                    .await
                    .map_err(ApiError::transport)?;
                Self::read(response).await
            })
            .await?;

        Ok(body
            .result
            .as_ref()
            .and_then(|r| r.get("message_id"))
            .and_then(|id| id.as_i64()))
    }

    pub async fn send_photo(&self, chat_id: &str, png: &[u8], caption: &str) -> Result<()> {
        let url = self.method_url("sendPhoto");
        let url = &url;
        self.with_retry(|| async move {
            let photo = Part::bytes(png.to_vec())
                .file_name("screenshot.png")
                .mime_str("image/png")
                .map_err(ApiError::transport)?;
            let form = Form::new()
                .text("chat_id", chat_id.to_string())
                .text("caption", caption.to_string())
                .part("photo", photo);
            let response = self
                .http
                .post(url)
                .multipart(form)
                .send()
                .await
                .map_err(ApiError::transport)?;
            Self::read(response).await
        })
        .await?;
        Ok(())
    }

    /// Send up to [`MEDIA_GROUP_LIMIT`] JPEG frames as one album.
    pub async fn send_media_group(&self, chat_id: &str, frames: &[PathBuf]) -> Result<()> {
        let frames = &frames[frames.len().saturating_sub(MEDIA_GROUP_LIMIT)..];
        if frames.is_empty() {
            return Ok(());
        }

        let mut images = Vec::with_capacity(frames.len());
        for path in frames {
            images.push(tokio::fs::read(path).await?);
        }

        let images = &images;

        // A single frame is not a valid album.
        if images.len() == 1 {
            let url = self.method_url("sendPhoto");
            let url = &url;
            return self
                .with_retry(|| async move {
                    let part = Part::bytes(images[0].clone())
                        .file_name("frame.jpg")
                        .mime_str("image/jpeg")
                        .map_err(ApiError::transport)?;
                    let form = Form::new().text("chat_id", chat_id.to_string()).part("photo", part);
                    let response = self.http.post(url).multipart(form).send().await.map_err(ApiError::transport)?;
                    Self::read(response).await
                })
                .await
                .map(|_| ());
        }

        let media: Vec<serde_json::Value> = (0..images.len())
            .map(|i| json!({ "type": "photo", "media": format!("attach://frame{}", i) }))
            .collect();
        let media = serde_json::to_string(&media)?;

        let url = self.method_url("sendMediaGroup");
        let (url, media) = (&url, &media);
        self.with_retry(|| async move {
            let mut form = Form::new()
                .text("chat_id", chat_id.to_string())
                .text("media", media.clone());
            for (i, image) in images.iter().enumerate() {
                let part = Part::bytes(image.clone())
                    .file_name(format!("frame{}.jpg", i))
                    .mime_str("image/jpeg")
                    .map_err(ApiError::transport)?;
                form = form.part(format!("frame{}", i), part);
            }
            let response = self.http.post(url).multipart(form).send().await.map_err(ApiError::transport)?;
            Self::read(response).await
        })
        .await?;
        Ok(())
    }
}

/// Subscriber chat delivery. The subscriber id is the Telegram chat id.
pub struct TelegramNotifier {
    client: TelegramClient,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatSender for TelegramNotifier {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, subscriber_id: &str, text: &str) -> Result<NotificationResult> {
        let message_id = self.client.send_message(subscriber_id, text, Some("Markdown")).await?;
        Ok(NotificationResult::sent(message_id.map(|id| id.to_string())))
    }
}
