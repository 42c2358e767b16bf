//! Bulk sink trait.

use async_trait::async_trait;

use etl_types::IndexDocument;

use crate::error::SinkError;

/// A search engine accepting bulk upserts.
///
/// Implementations report per-document failures as
/// [`SinkError::DocumentErrors`], never as a partial success.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Upsert every document into `index`, keyed by [`IndexDocument::id`].
    async fn bulk_upsert(&self, index: &str, documents: &[IndexDocument])
        -> Result<(), SinkError>;

    /// Name of this sink for logging.
    fn name(&self) -> &str;
}
