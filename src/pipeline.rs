//! Fetch, diff, persist, notify for one identifier at a time.

use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::config::SchedulerConfig;
use crate::diff::StatusDiffEngine;
use crate::fanout::{DispatchReport, NotificationFanout};
use crate::models::{StatusEntry, TrackedRecord};
use crate::orchestrator::FetchOrchestrator;
use crate::store::RecordStore;
use crate::utils::{AppError, Result};

/// One async mutex per identifier, created on first use and dropped again
/// when the last holder or waiter lets go.
#[derive(Default)]
pub struct IdentifierLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentifierLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, identifier: &str) -> IdentifierGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(identifier.to_string()).or_default().clone()
        };
        IdentifierGuard {
            locks: self,
            identifier: identifier.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

/// Exclusive hold on one identifier.
pub struct IdentifierGuard<'a> {
    locks: &'a IdentifierLocks,
    identifier: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentifierGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Clones are only handed out under this mutex, so a count of one means
        // nobody holds or waits on the entry.
        let mut locks = self.locks.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(&self.identifier).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.identifier);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub record: TrackedRecord,
    pub changed: bool,
    pub new_entries: Vec<StatusEntry>,
    pub report: DispatchReport,
}

pub struct StatusPipeline {
    orchestrator: Arc<FetchOrchestrator>,
    records: Arc<dyn RecordStore>,
    fanout: Arc<NotificationFanout>,
    diff: StatusDiffEngine,
    locks: IdentifierLocks,
    config: SchedulerConfig,
}

impl StatusPipeline {
    pub fn new(
        orchestrator: Arc<FetchOrchestrator>,
        records: Arc<dyn RecordStore>,
        fanout: Arc<NotificationFanout>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            records,
            fanout,
            diff: StatusDiffEngine::new(),
            locks: IdentifierLocks::new(),
            config,
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Scheduled run. The record is saved before any notification goes out.
    pub async fn run(&self, identifier: &str) -> Result<PipelineOutcome> {
        let _guard = self.locks.acquire(identifier).await;
        self.run_locked(identifier).await
    }

    /// On-demand run, refused while the record is younger than the cooldown.
    pub async fn run_manual(&self, identifier: &str, privileged: bool) -> Result<PipelineOutcome> {
        let _guard = self.locks.acquire(identifier).await;

        if let Some(record) = self.records.load_record(identifier).await? {
            let cooldown_minutes = if privileged {
                self.config.privileged_cooldown_minutes
            } else {
                self.config.manual_cooldown_minutes
            };
            let remaining = chrono::Duration::minutes(cooldown_minutes) - (Utc::now() - record.last_update);
            if remaining > chrono::Duration::zero() {
                let minutes = ((remaining.num_seconds() + 59) / 60).max(1);
                tracing::info!(identifier = %identifier, "Manual check refused, {} min cooldown left", minutes);
                return Err(AppError::Cooldown { minutes });
            }
        }

        self.run_locked(identifier).await
    }

    /// Start tracking without notifying about what is already there.
    pub async fn track(&self, identifier: &str) -> Result<TrackedRecord> {
        let _guard = self.locks.acquire(identifier).await;

        if let Some(existing) = self.records.load_record(identifier).await? {
            return Ok(existing);
        }

        let entries = self.fetch(identifier).await?;
        let record = TrackedRecord::with_entries(identifier, entries);
        self.records.save_record(&record).await?;
        tracing::info!(identifier = %identifier, entries = record.entries.len(), "Started tracking");
        Ok(record)
    }

    async fn run_locked(&self, identifier: &str) -> Result<PipelineOutcome> {
        let fresh = match self.fetch(identifier).await {
            Ok(fresh) => fresh,
            Err(e) => {
                counter!("pipeline_runs_total", "outcome" => "fetch_failed").increment(1);
                return Err(e);
            }
        };

        let mut record = self
            .records
            .load_record(identifier)
            .await?
            .unwrap_or_else(|| TrackedRecord::new(identifier));
        let diff = self.diff.apply(&mut record, fresh);

        self.records.save_record(&record).await?;

        let report = if diff.changed {
            self.fanout.dispatch(identifier, &diff.new_entries).await
        } else {
            DispatchReport::default()
        };

        let outcome = if diff.changed { "changed" } else { "unchanged" };
        counter!("pipeline_runs_total", "outcome" => outcome).increment(1);
        tracing::info!(identifier = %identifier, new_entries = diff.new_entries.len(), "Pipeline run {}", outcome);

        Ok(PipelineOutcome {
            record,
            changed: diff.changed,
            new_entries: diff.new_entries,
            report,
        })
    }

    async fn fetch(&self, identifier: &str) -> Result<Vec<StatusEntry>> {
        let limit = Duration::from_secs(self.config.check_timeout);
        match tokio::time::timeout(limit, self.orchestrator.check(identifier, true)).await {
            Ok(Ok(entries)) => Ok(entries),
            Ok(Err(failure)) => Err(AppError::Fetch {
                identifier: identifier.to_string(),
                reason: failure.to_string(),
            }),
            Err(_) => {
                // The abandoned check has raised its browser cancel flag on drop.
                tracing::warn!(identifier = %identifier, "Check timed out after {}s", limit.as_secs());
                self.orchestrator.settle().await;
                Err(AppError::Fetch {
                    identifier: identifier.to_string(),
                    reason: format!("timed out after {}s", limit.as_secs()),
                })
            }
        }
    }
}
