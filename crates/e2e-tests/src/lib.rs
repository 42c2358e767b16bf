//! End-to-end test infrastructure for movies-etl.
//!
//! Provides a shared TestHarness wiring the in-memory source, index and
//! watermark store into a real [`SyncPipeline`], plus row builders keyed
//! by day so scenarios read as timelines.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use etl_pipeline::{PipelineConfig, SyncPipeline};
use etl_sink::{BulkSink, IndexWriter, MemoryIndex, RetryConfig};
use etl_source::{BatchCursor, ChangeSource, MemorySource, SourceError};
use etl_storage::{MemoryWatermarkStore, WatermarkStore};
use etl_types::{
    ChangeRow, EntityKind, EntitySyncJob, FilmRef, GenreRef, GenreRow, JobRegistry, MovieRow,
    PersonFilmRef, PersonRef, PersonRow,
};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub source: Arc<MemorySource>,
    /// Wraps `source` and records how many cursors were open at each `open`
    pub tracking: Arc<TrackingSource>,
    pub index: Arc<MemoryIndex>,
    pub store: Arc<MemoryWatermarkStore>,
    pub cancel: CancellationToken,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let source = Arc::new(MemorySource::new());
        Self {
            _temp_dir: temp_dir,
            tracking: Arc::new(TrackingSource::new(source.clone())),
            source,
            index: Arc::new(MemoryIndex::new()),
            store: Arc::new(MemoryWatermarkStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Path inside the harness temp dir, for file-backed stores.
    pub fn path(&self, name: &str) -> PathBuf {
        self._temp_dir.path().join(name)
    }

    /// Pipeline over the harness source, index and memory store.
    pub fn pipeline(&self, jobs: JobRegistry, batch_size: usize) -> SyncPipeline {
        self.pipeline_with_store(jobs, batch_size, self.store.clone())
    }

    /// Pipeline over the harness source and index with another store.
    pub fn pipeline_with_store(
        &self,
        jobs: JobRegistry,
        batch_size: usize,
        store: Arc<dyn WatermarkStore>,
    ) -> SyncPipeline {
        let sink: Arc<dyn BulkSink> = self.index.clone();
        let writer = IndexWriter::new(sink, fast_retry(), self.cancel.clone());
        SyncPipeline::new(
            self.tracking.clone(),
            writer,
            store,
            jobs,
            PipelineConfig::default()
                .with_batch_size(batch_size)
                .with_idle_interval(Duration::from_secs(60)),
            self.cancel.clone(),
        )
    }

    pub fn watermark(&self, entity: EntityKind) -> Option<DateTime<Utc>> {
        self.store
            .get(entity.default_watermark_key())
            .expect("Failed to read watermark")
    }

    pub fn set_watermark(&self, entity: EntityKind, value: DateTime<Utc>) {
        self.store
            .set(entity.default_watermark_key(), value)
            .expect("Failed to set watermark");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry schedule with millisecond delays and three attempts per batch.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_interval: Duration::from_millis(1),
        multiplier: 2.0,
        max_interval: Duration::from_millis(4),
        max_elapsed: Duration::from_secs(5),
        max_attempts: Some(3),
    }
}

pub fn only(entity: EntityKind) -> JobRegistry {
    JobRegistry::new(vec![EntitySyncJob::new(entity)]).expect("Failed to build registry")
}

/// Midnight UTC on the given day of January 2024.
pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap()
}

pub fn movie(id: &str, title: &str, changed: u32) -> ChangeRow {
    ChangeRow::Movie(MovieRow {
        id: id.to_string(),
        title: Some(title.to_string()),
        description: Some(format!("About {}", title)),
        imdb_rating: Some(7.5),
        genres: vec![GenreRef {
            uuid: "g-1".to_string(),
            name: "Drama".to_string(),
        }],
        directors_names: vec!["Ann Director".to_string()],
        actors_names: vec!["Bob Actor".to_string(), "Ann Actor".to_string()],
        writers_names: vec![],
        directors: vec![PersonRef {
            id: "p-9".to_string(),
            name: "Ann Director".to_string(),
        }],
        actors: vec![
            PersonRef {
                id: "p-2".to_string(),
                name: "Bob Actor".to_string(),
            },
            PersonRef {
                id: "p-1".to_string(),
                name: "Ann Actor".to_string(),
            },
        ],
        writers: vec![],
        last_change_date: day(changed),
    })
}

/// A movie row the transformer must refuse.
pub fn untitled_movie(id: &str, changed: u32) -> ChangeRow {
    match movie(id, "", changed) {
        ChangeRow::Movie(mut row) => {
            row.title = None;
            ChangeRow::Movie(row)
        }
        other => other,
    }
}

pub fn genre(id: &str, name: &str, changed: u32) -> ChangeRow {
    ChangeRow::Genre(GenreRow {
        id: id.to_string(),
        name: Some(name.to_string()),
        description: None,
        films: vec![FilmRef {
            id: "m-1".to_string(),
            title: "Heat".to_string(),
            imdb_rating: Some(8.3),
        }],
        last_change_date: day(changed),
    })
}

pub fn person(id: &str, full_name: &str, changed: u32) -> ChangeRow {
    ChangeRow::Person(PersonRow {
        id: id.to_string(),
        full_name: Some(full_name.to_string()),
        films: vec![PersonFilmRef {
            id: "m-1".to_string(),
            title: "Heat".to_string(),
            imdb_rating: Some(8.3),
            roles: vec!["actor".to_string()],
        }],
        last_change_date: day(changed),
    })
}

/// Change source wrapper recording the peak number of cursors that were
/// already open whenever a new one was requested.
pub struct TrackingSource {
    inner: Arc<MemorySource>,
    open_at_request: AtomicUsize,
}

impl TrackingSource {
    pub fn new(inner: Arc<MemorySource>) -> Self {
        Self {
            inner,
            open_at_request: AtomicUsize::new(0),
        }
    }

    /// Highest count of open cursors observed when `open` was called.
    pub fn peak_open_at_request(&self) -> usize {
        self.open_at_request.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeSource for TrackingSource {
    async fn open(
        &self,
        job: &EntitySyncJob,
        since: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchCursor>, SourceError> {
        self.open_at_request
            .fetch_max(self.inner.open_cursor_count(), Ordering::SeqCst);
        self.inner.open(job, since, batch_size).await
    }

    fn name(&self) -> &str {
        "tracking"
    }
}
