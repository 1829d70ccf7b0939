use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::{AppConfig, SchedulerConfig};
use crate::pipeline::StatusPipeline;
use crate::utils::{AppError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub cron_expression: String,
    pub completed_cycles: u64,
    pub skipped_cycles: u64,
    pub identifiers_checked: u64,
    pub identifiers_changed: u64,
    pub identifiers_failed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_ms: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Runs a pipeline pass over every tracked identifier on a cron schedule.
/// A tick that fires while the previous cycle is still running is skipped.
pub struct StatusScheduler {
    scheduler: JobScheduler,
    pipeline: Arc<StatusPipeline>,
    stats: Arc<RwLock<SchedulerStats>>,
    busy: Arc<AtomicBool>,
    job_id: Option<Uuid>,
    config: SchedulerConfig,
    start_time: DateTime<Utc>,
}

impl StatusScheduler {
    pub async fn new(pipeline: Arc<StatusPipeline>, config: SchedulerConfig) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            pipeline,
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            busy: Arc::new(AtomicBool::new(false)),
            job_id: None,
            config,
            start_time: Utc::now(),
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let cron = self.config.interval.clone();
        self.schedule(&cron).await?;
        self.scheduler.start().await?;
        tracing::info!("Status scheduler started with interval: {}", cron);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        tracing::info!("Status scheduler shutdown");
        Ok(())
    }

    /// Replace the polling interval. A cycle already in flight finishes.
    pub async fn reschedule(&mut self, cron: &str) -> Result<()> {
        if !AppConfig::is_valid_cron(cron) {
            return Err(AppError::Validation(format!("Invalid cron expression: {}", cron)));
        }
        if let Some(job_id) = self.job_id.take() {
            self.scheduler.remove(&job_id).await?;
        }
        self.schedule(cron).await?;
        self.config.interval = cron.to_string();
        tracing::info!("Rescheduled status polling: {}", cron);
        Ok(())
    }

    /// Run one cycle now, outside the schedule. `None` when a cycle is already running.
    pub async fn run_cycle(&self) -> Option<CycleSummary> {
        Self::execute_cycle(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.stats),
            Arc::clone(&self.busy),
        )
        .await
    }

    pub async fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.read().await.clone();
        stats.cron_expression = self.config.interval.clone();
        stats.uptime_seconds = Utc::now().signed_duration_since(self.start_time).num_seconds().max(0) as u64;
        stats
    }

    async fn schedule(&mut self, cron: &str) -> Result<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let stats = Arc::clone(&self.stats);
        let busy = Arc::clone(&self.busy);

        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let stats = Arc::clone(&stats);
            let busy = Arc::clone(&busy);

            Box::pin(async move {
                Self::execute_cycle(pipeline, stats, busy).await;
            })
        })?;

        self.job_id = Some(self.scheduler.add(job).await?);
        Ok(())
    }

    async fn execute_cycle(
        pipeline: Arc<StatusPipeline>,
        stats: Arc<RwLock<SchedulerStats>>,
        busy: Arc<AtomicBool>,
    ) -> Option<CycleSummary> {
        if busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Previous polling cycle still running, skipping this tick");
            stats.write().await.skipped_cycles += 1;
            return None;
        }

        let start_time = tokio::time::Instant::now();
        let summary = Self::check_all(&pipeline).await;
        busy.store(false, Ordering::Release);

        let elapsed = start_time.elapsed();
        {
            let mut stats = stats.write().await;
            stats.completed_cycles += 1;
            stats.identifiers_checked += summary.checked as u64;
            stats.identifiers_changed += summary.changed as u64;
            stats.identifiers_failed += summary.failed as u64;
            stats.last_cycle_at = Some(Utc::now());
            stats.last_cycle_ms = elapsed.as_millis() as u64;
        }

        tracing::info!(
            checked = summary.checked,
            changed = summary.changed,
            failed = summary.failed,
            "Polling cycle finished in {:?}",
            elapsed
        );
        Some(summary)
    }

    async fn check_all(pipeline: &StatusPipeline) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let identifiers = match pipeline.records().list_identifiers().await {
            Ok(identifiers) => identifiers,
            Err(e) => {
                tracing::error!("Could not list tracked identifiers: {}", e);
                return summary;
            }
        };

        // One identifier at a time; the browser tier is the bottleneck anyway.
        for identifier in identifiers {
            summary.checked += 1;
            match pipeline.run(&identifier).await {
                Ok(outcome) if outcome.changed => summary.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(identifier = %identifier, "Scheduled check failed: {}", e);
                }
            }
        }
        summary
    }
}
