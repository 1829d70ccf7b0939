//! Fetch tiers for the status endpoint.
//!
//! [`PrimaryFetcher`] issues one spoofed HTTP request. When it fails, the
//! orchestrator walks an attempt chain through [`BrowserFetcher`], one proxy
//! (or the direct connection) at a time.

pub mod browser;
pub mod challenge;
pub mod headers;
pub mod primary;
pub mod proxy;
pub mod recording;
pub mod stealth;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use url::Url;

use crate::diagnostics::DiagnosticEvidence;
use crate::models::{Attempt, FetchFailure, FetchResult, ProxyCandidate, StatusEntry};

pub use browser::BrowserFetcher;
pub use primary::PrimaryFetcher;
pub use proxy::ProxyPool;

/// Cheap single-request tier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, identifier: &str) -> FetchResult;
}

/// Result of one browser attempt plus any evidence captured on failure.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub result: FetchResult,
    pub evidence: Option<DiagnosticEvidence>,
}

impl AttemptOutcome {
    pub fn failed(failure: FetchFailure) -> Self {
        Self {
            result: Err(failure),
            evidence: None,
        }
    }
}

/// Expensive tier, invoked once per link of the attempt chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserSource: Send + Sync {
    async fn fetch(&self, identifier: &str, attempt: &Attempt) -> AttemptOutcome;

    /// Wait, within a bound, until no abandoned attempt still holds a browser.
    async fn settle(&self) {}
}

/// Source of reachable proxies, in configured priority order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn working_proxies(&self) -> Vec<ProxyCandidate>;
}

/// Random cache-busting value sent as the `_` query parameter.
pub fn cache_buster() -> u64 {
    rand::rng().random_range(1_000_000_000_000u64..2_000_000_000_000u64)
}

/// `<origin><path>?sessionId=<identifier>&_=<cache_buster>`
pub fn target_url(origin: &str, path: &str, identifier: &str, cache_buster: u64) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(origin)?.join(path)?;
    url.query_pairs_mut()
        .append_pair("sessionId", identifier)
        .append_pair("_", &cache_buster.to_string());
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    #[serde(rename = "StatusInfo")]
    status_info: Option<Vec<RawStatus>>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(rename = "StatusName")]
    name: String,
    #[serde(rename = "StatusDateUF")]
    date: EpochMillis,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EpochMillis {
    Number(i64),
    Text(String),
}

impl EpochMillis {
    fn as_millis(&self) -> Option<i64> {
        match self {
            EpochMillis::Number(n) => Some(*n),
            EpochMillis::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Normalize a `{"StatusInfo":[...]}` body into ordered entries.
pub fn parse_status_payload(body: &str) -> FetchResult {
    let payload: StatusPayload = serde_json::from_str(body.trim())
        .map_err(|e| FetchFailure::Malformed(format!("not a status payload: {}", e)))?;

    let raw = payload
        .status_info
        .ok_or_else(|| FetchFailure::Malformed("StatusInfo missing".to_string()))?;

    raw.into_iter()
        .map(|status| {
            let timestamp_ms = status.date.as_millis().ok_or_else(|| {
                FetchFailure::Malformed(format!("bad StatusDateUF for '{}'", status.name))
            })?;
            Ok(StatusEntry::new(status.name, timestamp_ms))
        })
        .collect()
}
