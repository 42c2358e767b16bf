//! Source and cursor traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use etl_types::{ChangeRow, EntitySyncJob};

use crate::error::SourceError;

/// Opens change cursors for sync jobs.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Open a cursor over the job's rows with `last_change_date > since`,
    /// ordered by name then id, fetched `batch_size` rows at a time.
    async fn open(
        &self,
        job: &EntitySyncJob,
        since: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchCursor>, SourceError>;

    /// Name of this source for logging.
    fn name(&self) -> &str;
}

/// Forward-only, non-restartable batch cursor.
///
/// Each `Some` batch holds between 1 and `batch_size` rows. `None` means the
/// cursor is exhausted; later calls keep returning `None`.
#[async_trait]
pub trait BatchCursor: Send {
    async fn next_batch(&mut self) -> Result<Option<Vec<ChangeRow>>, SourceError>;

    /// Release server-side resources. Safe to call more than once.
    async fn close(&mut self) -> Result<(), SourceError>;
}
