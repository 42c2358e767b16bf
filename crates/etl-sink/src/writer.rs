//! Bulk writer with bounded exponential backoff.
//!
//! Transient sink failures (transport errors, throttling, 5xx) are retried
//! with the same batch until the retry budget runs out. Permanent failures
//! return immediately. A shutdown request interrupts the wait between
//! attempts, never a request already in flight.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use etl_types::{IndexDocument, RetrySettings};

use crate::error::SinkError;
use crate::sink::BulkSink;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Budget for one batch, counted from its first attempt
    pub max_elapsed: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            initial_interval: settings.initial_interval(),
            multiplier: settings.multiplier,
            max_interval: settings.max_interval(),
            max_elapsed: settings.max_elapsed(),
            max_attempts: settings.max_attempts,
        }
    }
}

impl RetryConfig {
    /// Deterministic schedule: no jitter, so delays are exactly
    /// `initial * multiplier^n` capped at `max_interval`.
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .with_randomization_factor(0.0)
            .build()
    }
}

/// Writes batches through a [`BulkSink`], retrying transient failures.
#[derive(Clone)]
pub struct IndexWriter {
    sink: Arc<dyn BulkSink>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl IndexWriter {
    pub fn new(sink: Arc<dyn BulkSink>, retry: RetryConfig, cancel: CancellationToken) -> Self {
        Self {
            sink,
            retry,
            cancel,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Write one batch. Returns the number of attempts it took.
    ///
    /// On error nothing is known about which documents were applied; the
    /// caller must not advance past this batch.
    pub async fn write(&self, index: &str, documents: &[IndexDocument]) -> Result<u32, SinkError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut backoff = self.retry.backoff();
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SinkError::Cancelled);
            }

            attempts += 1;
            debug!(index = index, docs = documents.len(), attempt = attempts, "Writing batch");

            let err = match self.sink.bulk_upsert(index, documents).await {
                Ok(()) => return Ok(attempts),
                Err(e) if !e.is_transient() => {
                    error!(index = index, error = %e, "Bulk write failed permanently");
                    return Err(e);
                }
                Err(e) => e,
            };

            if self.retry.max_attempts.is_some_and(|max| attempts >= max) {
                error!(index = index, attempts = attempts, error = %err, "Max retries exceeded");
                return Err(SinkError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let Some(delay) = backoff.next_backoff() else {
                error!(index = index, attempts = attempts, error = %err, "Backoff exhausted");
                return Err(SinkError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            };

            warn!(
                index = index,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Bulk write failed, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SinkError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
