use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outbound proxy endpoint with the result of its latest health check.
/// Rebuilt every orchestration run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub url: String,
    pub alive: bool,
    pub last_checked: DateTime<Utc>,
}

/// One link of the attempt chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Proxy(ProxyCandidate),
    Direct,
}

impl Attempt {
    pub fn proxy_url(&self) -> Option<&str> {
        match self {
            Attempt::Proxy(candidate) => Some(candidate.url.as_str()),
            Attempt::Direct => None,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Proxy(candidate) => write!(f, "proxy {}", candidate.url),
            Attempt::Direct => write!(f, "direct connection"),
        }
    }
}
