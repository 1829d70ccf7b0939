use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::{Client, Proxy};
use std::time::Duration;

use super::ProxySource;
use crate::config::ProxyConfig;
use crate::models::ProxyCandidate;

/// Health-checks the configured proxy list and keeps the reachable ones.
pub struct ProxyPool {
    config: ProxyConfig,
}

impl ProxyPool {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    pub fn candidates(&self) -> &[String] {
        &self.config.candidates
    }

    /// Check every candidate, preserving configured order.
    pub async fn check_all(&self) -> Vec<ProxyCandidate> {
        let timeout = Duration::from_millis(self.config.check_timeout_ms);
        let checks = self
            .config
            .candidates
            .iter()
            .map(|url| check_proxy(url, &self.config.check_url, timeout));
        join_all(checks).await
    }
}

async fn check_proxy(proxy_url: &str, check_url: &str, timeout: Duration) -> ProxyCandidate {
    let alive = match health_check(proxy_url, check_url, timeout).await {
        Ok(status) => {
            tracing::debug!(proxy = %proxy_url, status = status, "Proxy reachable");
            true
        }
        Err(e) => {
            tracing::debug!(proxy = %proxy_url, "Proxy check failed: {}", e);
            false
        }
    };

    ProxyCandidate {
        url: proxy_url.to_string(),
        alive,
        last_checked: Utc::now(),
    }
}

async fn health_check(proxy_url: &str, check_url: &str, timeout: Duration) -> Result<u16, String> {
    let client = Client::builder()
        .proxy(Proxy::all(proxy_url).map_err(|e| e.to_string())?)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    // Any HTTP answer proves the tunnel works; the status itself is irrelevant.
    match tokio::time::timeout(timeout, client.head(check_url).send()).await {
        Ok(Ok(response)) => Ok(response.status().as_u16()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {:?}", timeout)),
    }
}

#[async_trait]
impl ProxySource for ProxyPool {
    async fn working_proxies(&self) -> Vec<ProxyCandidate> {
        let checked = self.check_all().await;
        let total = checked.len();
        let alive: Vec<ProxyCandidate> = checked.into_iter().filter(|c| c.alive).collect();
        tracing::info!("{}/{} proxies reachable", alive.len(), total);
        alive
    }
}
