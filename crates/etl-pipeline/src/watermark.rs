//! Watermark accumulation for a single pass.
//!
//! A pass starts from the stored watermark, folds in the `last_change_date`
//! of every batch that was written, and is committed once at the end. The
//! accumulator is a plain value handed from batch to batch; nothing is
//! persisted until the caller decides the pass succeeded.

use chrono::{DateTime, TimeZone, Utc};

use etl_types::IndexDocument;

/// Lower bound used when no watermark has been stored: `0001-01-01T00:00:00Z`.
pub fn min_watermark() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkAccumulator {
    start: DateTime<Utc>,
    max_seen: Option<DateTime<Utc>>,
    rows: usize,
}

impl WatermarkAccumulator {
    /// Begin a pass at the stored watermark, or at [`min_watermark`] if none.
    pub fn start(stored: Option<DateTime<Utc>>) -> Self {
        Self {
            start: stored.unwrap_or_else(min_watermark),
            max_seen: None,
            rows: 0,
        }
    }

    /// Lower bound for extraction.
    pub fn since(&self) -> DateTime<Utc> {
        self.start
    }

    /// Fold in a batch that was written successfully.
    #[must_use]
    pub fn observe(self, batch: &[IndexDocument]) -> Self {
        let batch_max = batch.iter().map(|doc| doc.last_change_date).max();
        Self {
            start: self.start,
            max_seen: self.max_seen.max(batch_max),
            rows: self.rows + batch.len(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn max_seen(&self) -> Option<DateTime<Utc>> {
        self.max_seen
    }

    /// The value to persist, if the pass moved the watermark forward.
    ///
    /// `None` when no rows were seen or none was newer than the start.
    pub fn commit_value(&self) -> Option<DateTime<Utc>> {
        self.max_seen.filter(|max| *max > self.start)
    }
}
