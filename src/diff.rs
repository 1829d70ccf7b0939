use chrono::{DateTime, Utc};

use crate::models::{StatusEntry, TrackedRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    pub changed: bool,
    pub new_entries: Vec<StatusEntry>,
}

/// Append-only change detection: whatever `fresh` holds beyond the stored
/// length is new. Entries at overlapping positions are not compared.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusDiffEngine;

impl StatusDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Overwrites `record` with `fresh` and refreshes `last_update`, whether or not anything changed.
    pub fn apply(&self, record: &mut TrackedRecord, fresh: Vec<StatusEntry>) -> DiffOutcome {
        self.apply_at(record, fresh, Utc::now())
    }

    pub fn apply_at(&self, record: &mut TrackedRecord, fresh: Vec<StatusEntry>, now: DateTime<Utc>) -> DiffOutcome {
        let known = record.entries.len();
        if fresh.len() < known {
            tracing::warn!(
                identifier = %record.identifier,
                stored = known,
                fetched = fresh.len(),
                "Fetched list is shorter than the stored one"
            );
        }

        let new_entries: Vec<StatusEntry> = fresh.iter().skip(known).cloned().collect();
        record.entries = fresh;
        record.last_update = now;

        DiffOutcome {
            changed: !new_entries.is_empty(),
            new_entries,
        }
    }
}
