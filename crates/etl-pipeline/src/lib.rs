//! Sync pipeline for the movies ETL.
//!
//! ## Key Components
//!
//! - [`transform`]: raw rows to index documents
//! - [`WatermarkAccumulator`]: per-pass high-water mark, committed once
//! - [`SyncPipeline`]: runs every job per pass and loops with an idle pause

pub mod error;
pub mod pipeline;
pub mod transform;
pub mod watermark;

pub use error::{SyncError, TransformError};
pub use pipeline::{JobReport, PassReport, PipelineConfig, SyncPipeline};
pub use transform::{
    transform, transform_batch, AccessRule, GenreDocument, MovieDocument, PersonDocument,
};
pub use watermark::{min_watermark, WatermarkAccumulator};
