use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One reported state of a tracked identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub text: String,
    pub timestamp_ms: i64,
}

impl StatusEntry {
    pub fn new(text: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            text: text.into(),
            timestamp_ms,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

/// Stored state for one identifier. `entries` only ever grows at the end
/// between successive fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRecord {
    pub identifier: String,
    pub entries: Vec<StatusEntry>,
    pub last_update: DateTime<Utc>,
}

impl TrackedRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            entries: Vec::new(),
            last_update: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn with_entries(identifier: impl Into<String>, entries: Vec<StatusEntry>) -> Self {
        Self {
            identifier: identifier.into(),
            entries,
            last_update: Utc::now(),
        }
    }

    pub fn latest(&self) -> Option<&StatusEntry> {
        self.entries.last()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("anti-bot challenge not resolved: {0}")]
    Challenge(String),

    #[error("blocked with HTTP status {0}")]
    Blocked(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("all {attempts} fetch attempts failed")]
    Exhausted { attempts: usize },
}

impl FetchFailure {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Transient(_) => "transient",
            FetchFailure::Challenge(_) => "challenge",
            FetchFailure::Blocked(_) => "blocked",
            FetchFailure::Malformed(_) => "malformed",
            FetchFailure::Exhausted { .. } => "exhausted",
        }
    }
}

/// Either the full ordered status list or the reason nothing was retrieved.
/// A failed fetch never carries partial entries.
pub type FetchResult = std::result::Result<Vec<StatusEntry>, FetchFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_empty() {
        let record = TrackedRecord::new("123456");
        assert!(record.entries.is_empty());
        assert!(record.latest().is_none());
        assert_eq!(record.last_update, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_entry_timestamp() {
        let entry = StatusEntry::new("Accepted", 1_700_000_000_000);
        let ts = entry.timestamp().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_failure_kind_labels() {
        assert_eq!(FetchFailure::Blocked(503).kind(), "blocked");
        assert_eq!(FetchFailure::Exhausted { attempts: 3 }.kind(), "exhausted");
        assert_eq!(
            FetchFailure::Exhausted { attempts: 3 }.to_string(),
            "all 3 fetch attempts failed"
        );
    }
}
