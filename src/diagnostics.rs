//! Failure evidence for the operator.
//!
//! Evidence is captured synchronously on the browser worker while the page is
//! still open, then handed to a [`DiagnosticSink`] on the async side. Sinks are
//! best-effort: the orchestrator runs them through
//! [`non_critical`](crate::utils::non_critical), so nothing here can fail a fetch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::Tab;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::fetcher::recording::SessionRecording;
use crate::models::{Attempt, FetchFailure};
use crate::plugins::TelegramClient;
use crate::utils::Result;

const IP_REVEAL_SELECTOR: &str = "#cf-footer-ip-reveal";
const CAPTION_LIMIT: usize = 1024;

pub struct DiagnosticEvidence {
    pub incident_id: Uuid,
    pub identifier: String,
    pub attempt: String,
    pub target_url: String,
    pub failure: String,
    pub page_title: Option<String>,
    pub screenshot: Option<Vec<u8>>,
    pub recording: Option<SessionRecording>,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Debug for DiagnosticEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticEvidence")
            .field("incident_id", &self.incident_id)
            .field("identifier", &self.identifier)
            .field("attempt", &self.attempt)
            .field("failure", &self.failure)
            .field("page_title", &self.page_title)
            .field("screenshot_bytes", &self.screenshot.as_ref().map(Vec::len))
            .field("frames", &self.recording.as_ref().map(|r| r.frames().len()))
            .finish()
    }
}

impl DiagnosticEvidence {
    pub fn new(identifier: &str, attempt: &Attempt, target_url: &str, failure: &FetchFailure) -> Self {
        Self {
            incident_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            attempt: attempt.to_string(),
            target_url: target_url.to_string(),
            failure: failure.to_string(),
            page_title: None,
            screenshot: None,
            recording: None,
            captured_at: Utc::now(),
        }
    }

    pub fn caption(&self) -> String {
        let caption = format!(
            "Fetch failed\nIncident: {}\nIdentifier: {}\nAttempt: {}\nFailure: {}\nTitle: {}\nURL: {}",
            self.incident_id,
            self.identifier,
            self.attempt,
            self.failure,
            self.page_title.as_deref().unwrap_or("-"),
            if self.target_url.is_empty() { "-" } else { &self.target_url },
        );
        match caption.char_indices().nth(CAPTION_LIMIT) {
            Some((end, _)) => caption[..end].to_string(),
            None => caption,
        }
    }
}

/// Best-effort capture from the open tab. Every step that fails is skipped.
pub fn capture(tab: &Tab, evidence: &mut DiagnosticEvidence) {
    if let Ok(reveal) = tab.wait_for_element_with_custom_timeout(IP_REVEAL_SELECTOR, Duration::from_millis(500)) {
        if reveal.click().is_ok() {
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    match tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true) {
        Ok(png) => evidence.screenshot = Some(png),
        Err(e) => tracing::debug!(incident = %evidence.incident_id, "Screenshot failed: {}", e),
    }

    evidence.page_title = tab.get_title().ok().filter(|t| !t.is_empty());
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    async fn report(&self, evidence: DiagnosticEvidence) -> Result<()>;
}

/// Forwards evidence to the operator chat.
pub struct TelegramDiagnosticReporter {
    client: TelegramClient,
    chat_id: String,
}

impl TelegramDiagnosticReporter {
    pub fn new(client: TelegramClient, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl DiagnosticSink for TelegramDiagnosticReporter {
    async fn report(&self, evidence: DiagnosticEvidence) -> Result<()> {
        let caption = evidence.caption();
        match &evidence.screenshot {
            Some(png) => self.client.send_photo(&self.chat_id, png, &caption).await?,
            None => {
                self.client.send_message(&self.chat_id, &caption, None).await?;
            }
        }

        if let Some(recording) = evidence.recording.as_ref().filter(|r| !r.is_empty()) {
            self.client.send_media_group(&self.chat_id, recording.frames()).await?;
        }

        tracing::info!(
            incident = %evidence.incident_id,
            identifier = %evidence.identifier,
            "Diagnostic report sent"
        );
        Ok(())
    }
}

/// Used when no operator chat is configured.
pub struct LogDiagnosticSink;

#[async_trait]
impl DiagnosticSink for LogDiagnosticSink {
    async fn report(&self, evidence: DiagnosticEvidence) -> Result<()> {
        tracing::warn!(
            incident = %evidence.incident_id,
            identifier = %evidence.identifier,
            attempt = %evidence.attempt,
            title = evidence.page_title.as_deref().unwrap_or("-"),
            "{}",
            evidence.failure
        );
        Ok(())
    }
}
