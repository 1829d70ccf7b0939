use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{redirect, Client, StatusCode};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use super::headers::random_browser_headers;
use super::{cache_buster, parse_status_payload, target_url, StatusSource};
use crate::config::TargetConfig;
use crate::models::{FetchFailure, FetchResult};
use crate::utils::AppError;

const LOGGED_BODY_LIMIT: usize = 2048;

/// What a trivial JavaScript challenge page asks the client to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrivialChallenge {
    pub cookie: Option<String>,
    pub redirect: Option<String>,
}

fn cookie_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"document\.cookie\s*=\s*["']([^"';]+=[^"';]*)"#).expect("valid cookie regex")
    })
}

fn redirect_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?:window\.|document\.)?location(?:\.href)?\s*=\s*["']([^"']+)["']"#)
            .expect("valid redirect regex")
    })
}

/// Recognize cookie-setting / redirecting challenge pages that need no JS engine.
pub fn detect_trivial_challenge(body: &str) -> Option<TrivialChallenge> {
    let cookie = cookie_pattern()
        .captures(body)
        .map(|caps| caps[1].trim().to_string());
    let redirect = redirect_pattern()
        .captures(body)
        .map(|caps| caps[1].trim().to_string());

    if cookie.is_none() && redirect.is_none() {
        return None;
    }
    Some(TrivialChallenge { cookie, redirect })
}

/// Single spoofed GET against the status endpoint. Never panics or errors
/// out; every problem becomes a [`FetchFailure`].
pub struct PrimaryFetcher {
    client: Client,
    config: TargetConfig,
}

impl PrimaryFetcher {
    pub fn new(config: TargetConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self { client, config })
    }

    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<(StatusCode, String), FetchFailure> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::Transient(format!("reading body: {}", e)))?;
        Ok((status, body))
    }
}

#[async_trait]
impl StatusSource for PrimaryFetcher {
    async fn fetch(&self, identifier: &str) -> FetchResult {
        let mut url = target_url(&self.config.origin, &self.config.status_path, identifier, cache_buster())
            .map_err(|e| FetchFailure::Malformed(format!("target url: {}", e)))?;
        let mut headers = random_browser_headers(&mut rand::rng());
        let mut rounds = 0;

        loop {
            let (status, body) = self.get(&url, headers.clone()).await?;

            if status == StatusCode::OK {
                match parse_status_payload(&body) {
                    Ok(entries) => {
                        tracing::debug!(identifier = %identifier, entries = entries.len(), "Primary fetch succeeded");
                        return Ok(entries);
                    }
                    Err(failure) if rounds >= self.config.challenge_rounds => return Err(failure),
                    Err(failure) => {
                        if !self.apply_challenge(&body, &mut url, &mut headers) {
                            return Err(failure);
                        }
                    }
                }
            } else {
                tracing::warn!(
                    identifier = %identifier,
                    status = status.as_u16(),
                    url = %url,
                    body = %truncate(&body, LOGGED_BODY_LIMIT),
                    "Primary fetch returned non-200"
                );
                if rounds >= self.config.challenge_rounds || !self.apply_challenge(&body, &mut url, &mut headers) {
                    return Err(FetchFailure::Blocked(status.as_u16()));
                }
            }

            rounds += 1;
            tracing::info!(identifier = %identifier, round = rounds, "Retrying after trivial challenge");
        }
    }
}

impl PrimaryFetcher {
    /// Mutates the next request according to a detected trivial challenge.
    /// Returns false when the body holds nothing solvable.
    fn apply_challenge(&self, body: &str, url: &mut Url, headers: &mut HeaderMap) -> bool {
        let Some(challenge) = detect_trivial_challenge(body) else {
            return false;
        };

        if let Some(cookie) = &challenge.cookie {
            let merged = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{}; {}", existing, cookie),
                None => cookie.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&merged) {
                headers.insert(COOKIE, value);
            }
        }

        if let Some(location) = &challenge.redirect {
            match url.join(location) {
                Ok(next) => *url = next,
                Err(e) => tracing::debug!("Ignoring unparsable challenge redirect {}: {}", location, e),
            }
        }
        true
    }
}

fn truncate(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
