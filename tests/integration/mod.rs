// Shared fixtures for the integration tests

pub mod fetch_tests;
pub mod notification_tests;
pub mod pipeline_tests;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};

use status_watcher::config::{AppConfig, DatabaseConfig, TargetConfig};
use status_watcher::diagnostics::{DiagnosticEvidence, DiagnosticSink};
use status_watcher::fetcher::{AttemptOutcome, BrowserSource, ProxySource};
use status_watcher::models::{Attempt, FetchFailure, ProxyCandidate, StatusEntry};
use status_watcher::plugins::{ChatSender, NotificationResult};
use status_watcher::store::SqliteStore;
use status_watcher::{AppError, Result};

pub const STATUS_PATH: &str = "/Home/CurrentSessionStatus";

pub fn get_test_config(origin: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.target = TargetConfig {
        origin: origin.to_string(),
        status_path: STATUS_PATH.to_string(),
        request_timeout: 5,
        challenge_rounds: 0,
    };
    config
}

pub async fn create_test_store() -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await?;
    store.init().await?;
    Ok(Arc::new(store))
}

pub fn entry(i: i64) -> StatusEntry {
    StatusEntry::new(format!("Status {}", i), 1_700_000_000_000 + i * 60_000)
}

pub fn entries(n: i64) -> Vec<StatusEntry> {
    (1..=n).map(entry).collect()
}

/// Body the status endpoint would answer with for `entries`.
pub fn status_body(entries: &[StatusEntry]) -> String {
    let info: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| serde_json::json!({ "StatusName": e.text, "StatusDateUF": e.timestamp_ms.to_string() }))
        .collect();
    serde_json::json!({ "StatusInfo": info }).to_string()
}

pub fn proxy(url: &str) -> ProxyCandidate {
    ProxyCandidate {
        url: url.to_string(),
        alive: true,
        last_checked: Utc::now(),
    }
}

pub struct FixedProxies(pub Vec<ProxyCandidate>);

#[async_trait]
impl ProxySource for FixedProxies {
    async fn working_proxies(&self) -> Vec<ProxyCandidate> {
        self.0.clone()
    }
}

/// Browser tier that fails every attempt, leaving evidence behind.
#[derive(Default)]
pub struct FailingBrowser {
    pub attempts: Mutex<Vec<Attempt>>,
}

#[async_trait]
impl BrowserSource for FailingBrowser {
    async fn fetch(&self, identifier: &str, attempt: &Attempt) -> AttemptOutcome {
        self.attempts.lock().unwrap().push(attempt.clone());
        let failure = FetchFailure::Transient("navigation timed out".to_string());
        AttemptOutcome {
            evidence: Some(DiagnosticEvidence::new(identifier, attempt, "http://target/", &failure)),
            result: Err(failure),
        }
    }
}

/// Browser tier that must never be reached.
pub struct UnreachableBrowser;

#[async_trait]
impl BrowserSource for UnreachableBrowser {
    async fn fetch(&self, _identifier: &str, attempt: &Attempt) -> AttemptOutcome {
        panic!("browser tier invoked for {}", attempt);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub reports: Mutex<Vec<DiagnosticEvidence>>,
}

#[async_trait]
impl DiagnosticSink for RecordingSink {
    async fn report(&self, evidence: DiagnosticEvidence) -> Result<()> {
        self.reports.lock().unwrap().push(evidence);
        Ok(())
    }
}

/// Records chat deliveries and refuses the listed subscribers.
#[derive(Default)]
pub struct RecordingChat {
    pub refuse: Vec<String>,
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChatSender for RecordingChat {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, subscriber_id: &str, text: &str) -> Result<NotificationResult> {
        if self.refuse.iter().any(|s| s == subscriber_id) {
            return Err(AppError::Notification {
                channel: "recording".to_string(),
                message: format!("chat {} not found", subscriber_id),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((subscriber_id.to_string(), text.to_string()));
        Ok(NotificationResult::sent(None))
    }
}
