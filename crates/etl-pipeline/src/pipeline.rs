//! Sync orchestration.
//!
//! Runs every registered job in order, one at a time. Per job and pass:
//! read the stored watermark, open a cursor above it, transform and write
//! each batch, and persist the highest `last_change_date` written only if
//! the whole stream went through. A failing job is logged and the next one
//! runs; the loop itself only stops on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use etl_sink::IndexWriter;
use etl_source::{BatchCursor, ChangeSource};
use etl_storage::WatermarkStore;
use etl_types::{EntityKind, EntitySyncJob, JobRegistry, Settings};

use crate::error::SyncError;
use crate::transform::transform_batch;
use crate::watermark::WatermarkAccumulator;

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on rows per fetch and documents per bulk request
    pub batch_size: usize,
    /// Pause between two passes
    pub idle_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            idle_interval: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            idle_interval: settings.idle_interval(),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }
}

/// Result of one successful job run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub entity: EntityKind,
    pub index: String,
    pub rows: usize,
    pub batches: usize,
    /// Write attempts beyond the first, summed over batches
    pub retries: u32,
    /// Watermark the pass started from
    pub since: DateTime<Utc>,
    /// Watermark persisted at the end, if it moved
    pub committed: Option<DateTime<Utc>>,
}

/// Outcome of one pass over all jobs.
#[derive(Debug, Default)]
pub struct PassReport {
    pub results: Vec<(EntityKind, Result<JobReport, SyncError>)>,
    /// Shutdown was requested before every job ran
    pub interrupted: bool,
}

impl PassReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.interrupted
    }

    pub fn rows(&self) -> usize {
        self.results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|report| report.rows)
            .sum()
    }

    pub fn report(&self, entity: EntityKind) -> Option<&Result<JobReport, SyncError>> {
        self.results
            .iter()
            .find(|(kind, _)| *kind == entity)
            .map(|(_, r)| r)
    }
}

/// Drives extraction, transformation and loading for every job.
pub struct SyncPipeline {
    source: Arc<dyn ChangeSource>,
    writer: IndexWriter,
    store: Arc<dyn WatermarkStore>,
    jobs: JobRegistry,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl SyncPipeline {
    /// `cancel` should be the same token the writer was built with, so one
    /// shutdown request stops both the loop and any backoff in progress.
    pub fn new(
        source: Arc<dyn ChangeSource>,
        writer: IndexWriter,
        store: Arc<dyn WatermarkStore>,
        jobs: JobRegistry,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            writer,
            store,
            jobs,
            config,
            cancel,
        }
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run passes until shutdown. Returns the number of passes started.
    pub async fn run(&self) -> u64 {
        info!(
            jobs = self.jobs.len(),
            batch_size = self.config.batch_size,
            idle_secs = self.config.idle_interval.as_secs(),
            source = self.source.name(),
            sink = self.writer.sink_name(),
            store = self.store.name(),
            "Starting sync loop"
        );

        let mut passes = 0;
        while !self.cancel.is_cancelled() {
            passes += 1;
            let report = self.run_pass().await;
            if report.interrupted {
                break;
            }

            debug!(sleep_secs = self.config.idle_interval.as_secs(), "Idle");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.idle_interval) => {}
            }
        }

        info!(passes = passes, "Sync loop stopped");
        passes
    }

    /// Run every job once, in registry order.
    pub async fn run_pass(&self) -> PassReport {
        info!(jobs = self.jobs.len(), "Starting pass");
        let mut report = PassReport::default();

        for job in self.jobs.jobs() {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let result = self.run_job(job).await;
            match &result {
                Ok(job_report) => info!(
                    job = %job.entity(),
                    index = job.index(),
                    rows = job_report.rows,
                    batches = job_report.batches,
                    watermark = ?job_report.committed,
                    "Job finished"
                ),
                Err(e) if e.is_cancelled() => {
                    warn!(job = %job.entity(), "Job interrupted by shutdown");
                    report.interrupted = true;
                }
                Err(e) => error!(job = %job.entity(), index = job.index(), error = %e, "Job failed"),
            }
            report.results.push((job.entity(), result));
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            rows = report.rows(),
            interrupted = report.interrupted,
            "Pass finished"
        );
        report
    }

    /// Synchronize one job. The watermark moves only if this returns `Ok`.
    pub async fn run_job(&self, job: &EntitySyncJob) -> Result<JobReport, SyncError> {
        let stored = self.store.get(job.watermark_key())?;
        let acc = WatermarkAccumulator::start(stored);
        info!(
            job = %job.entity(),
            index = job.index(),
            watermark = %acc.since(),
            "Starting job"
        );

        let mut cursor = self
            .source
            .open(job, acc.since(), self.config.batch_size)
            .await?;

        // The cursor is closed whatever the stream outcome, before the
        // next job opens its own.
        let streamed = self.stream(job, cursor.as_mut(), acc).await;
        if let Err(e) = cursor.close().await {
            warn!(job = %job.entity(), error = %e, "Failed to close cursor");
        }
        let (acc, batches, retries) = streamed?;

        let committed = acc.commit_value();
        match committed {
            Some(value) => {
                self.store.set(job.watermark_key(), value)?;
                info!(
                    job = %job.entity(),
                    key = job.watermark_key(),
                    watermark = %value,
                    "Committed watermark"
                );
            }
            None => debug!(job = %job.entity(), "No changes, watermark untouched"),
        }

        Ok(JobReport {
            entity: job.entity(),
            index: job.index().to_string(),
            rows: acc.rows(),
            batches,
            retries,
            since: acc.since(),
            committed,
        })
    }

    async fn stream(
        &self,
        job: &EntitySyncJob,
        cursor: &mut dyn BatchCursor,
        mut acc: WatermarkAccumulator,
    ) -> Result<(WatermarkAccumulator, usize, u32), SyncError> {
        let mut batches = 0;
        let mut retries = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(rows) = cursor.next_batch().await? else {
                break;
            };
            batches += 1;

            let documents = transform_batch(&rows)?;
            let attempts = self.writer.write(job.index(), &documents).await?;
            retries += attempts.saturating_sub(1);
            acc = acc.observe(&documents);

            info!(
                job = %job.entity(),
                index = job.index(),
                batch = batches,
                rows = documents.len(),
                "Wrote batch"
            );
        }

        Ok((acc, batches, retries))
    }
}
