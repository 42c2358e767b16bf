//! Pipeline error types.

use thiserror::Error;

use etl_sink::SinkError;
use etl_source::SourceError;
use etl_storage::WatermarkError;
use etl_types::EntityKind;

/// A row the transformer cannot turn into a document.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Malformed {entity} row '{id}': {reason}")]
    MalformedRow {
        entity: EntityKind,
        id: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why one job's pass failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Watermark error: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Pass interrupted by shutdown")]
    Cancelled,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled | SyncError::Sink(SinkError::Cancelled))
    }
}
