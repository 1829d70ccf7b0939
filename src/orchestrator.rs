use metrics::counter;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, DiagnosticPolicy};
use crate::diagnostics::{DiagnosticEvidence, DiagnosticSink, LogDiagnosticSink, TelegramDiagnosticReporter};
use crate::fetcher::{BrowserFetcher, BrowserSource, PrimaryFetcher, ProxyPool, ProxySource, StatusSource};
use crate::models::{Attempt, FetchFailure, FetchResult};
use crate::plugins::TelegramClient;
use crate::utils::{non_critical, Result};

/// Primary tier first, then one browser attempt per reachable proxy and a
/// final direct attempt, strictly one after another.
pub struct FetchOrchestrator {
    primary: Arc<dyn StatusSource>,
    browser: Arc<dyn BrowserSource>,
    proxies: Arc<dyn ProxySource>,
    diagnostics: Arc<dyn DiagnosticSink>,
    policy: DiagnosticPolicy,
    diagnostics_enabled: bool,
    /// Status endpoint, named in reports that carry no page evidence.
    target: String,
    attempt_backoff: Duration,
}

impl FetchOrchestrator {
    pub fn new(
        primary: Arc<dyn StatusSource>,
        browser: Arc<dyn BrowserSource>,
        proxies: Arc<dyn ProxySource>,
        diagnostics: Arc<dyn DiagnosticSink>,
        policy: DiagnosticPolicy,
    ) -> Self {
        Self {
            primary,
            browser,
            proxies,
            diagnostics,
            policy,
            diagnostics_enabled: true,
            target: String::new(),
            attempt_backoff: Duration::ZERO,
        }
    }

    pub fn with_attempt_backoff(mut self, backoff: Duration) -> Self {
        self.attempt_backoff = backoff;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool, target: impl Into<String>) -> Self {
        self.diagnostics_enabled = enabled;
        self.target = target.into();
        self
    }

    /// Wire the production tiers from configuration.
    pub fn from_config(config: &AppConfig, telegram: Option<TelegramClient>) -> Result<Self> {
        let primary = Arc::new(PrimaryFetcher::new(config.target.clone())?);
        let browser = Arc::new(BrowserFetcher::new(
            config.browser.clone(),
            config.target.clone(),
            config.diagnostics.enabled,
        ));
        let proxies = Arc::new(ProxyPool::new(config.proxies.clone()));

        let diagnostics: Arc<dyn DiagnosticSink> = match (telegram, &config.diagnostics.admin_chat_id) {
            (Some(client), Some(chat_id)) => Arc::new(TelegramDiagnosticReporter::new(client, chat_id.clone())),
            _ => Arc::new(LogDiagnosticSink),
        };

        let target = format!("{}{}", config.target.origin.trim_end_matches('/'), config.target.status_path);
        Ok(Self::new(primary, browser, proxies, diagnostics, config.diagnostics.policy)
            .with_attempt_backoff(Duration::from_millis(config.browser.attempt_backoff_ms))
            .with_diagnostics(config.diagnostics.enabled, target))
    }

    /// Returns the full ordered list when `want_all`, otherwise only the latest entry.
    pub async fn check(&self, identifier: &str, want_all: bool) -> FetchResult {
        let entries = self.fetch_all(identifier).await?;
        if want_all {
            return Ok(entries);
        }
        Ok(entries.into_iter().last().into_iter().collect())
    }

    async fn fetch_all(&self, identifier: &str) -> FetchResult {
        match self.primary.fetch(identifier).await {
            Ok(entries) => {
                counter!("fetch_attempts_total", "tier" => "primary", "outcome" => "success").increment(1);
                return Ok(entries);
            }
            Err(failure) => {
                counter!("fetch_attempts_total", "tier" => "primary", "outcome" => failure.kind()).increment(1);
                tracing::info!(identifier = %identifier, "Primary fetch failed ({}), falling back to browser", failure);
            }
        }

        let chain = self.attempt_chain().await;
        let total = chain.len();

        for (index, attempt) in chain.iter().enumerate() {
            if index > 0 && !self.attempt_backoff.is_zero() {
                tokio::time::sleep(self.attempt_backoff).await;
            }

            tracing::info!(identifier = %identifier, attempt = %attempt, "Browser attempt {}/{}", index + 1, total);
            let outcome = self.browser.fetch(identifier, attempt).await;

            match outcome.result {
                Ok(entries) => {
                    counter!("fetch_attempts_total", "tier" => "browser", "outcome" => "success").increment(1);
                    return Ok(entries);
                }
                Err(failure) => {
                    counter!("fetch_attempts_total", "tier" => "browser", "outcome" => failure.kind()).increment(1);
                    tracing::warn!(identifier = %identifier, attempt = %attempt, "Browser attempt failed: {}", failure);

                    let is_final = index + 1 == total;
                    if self.diagnostics_enabled && self.policy.should_report(is_final) {
                        // Timeouts and launch failures leave no page behind; report the text alone.
                        let evidence = outcome
                            .evidence
                            .unwrap_or_else(|| DiagnosticEvidence::new(identifier, attempt, &self.target, &failure));
                        self.report(identifier, evidence).await;
                    }
                }
            }
        }

        tracing::error!(identifier = %identifier, "All fetch attempts failed");
        Err(FetchFailure::Exhausted { attempts: total + 1 })
    }

    /// Reachable proxies in priority order, then the direct connection.
    async fn attempt_chain(&self) -> Vec<Attempt> {
        let mut chain: Vec<Attempt> = self
            .proxies
            .working_proxies()
            .await
            .into_iter()
            .map(Attempt::Proxy)
            .collect();
        chain.push(Attempt::Direct);
        chain
    }

    /// Wait until abandoned browser attempts have released their browsers.
    pub async fn settle(&self) {
        self.browser.settle().await;
    }

    async fn report(&self, identifier: &str, evidence: DiagnosticEvidence) {
        let sent = non_critical("diagnostic report", identifier, self.diagnostics.report(evidence)).await;
        let outcome = if sent.is_some() { "sent" } else { "failed" };
        counter!("diagnostics_reports_total", "outcome" => outcome).increment(1);
    }
}
