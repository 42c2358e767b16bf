//! In-memory change source.
//!
//! Applies the same contract as the PostgreSQL source (strict `> since`
//! filter, name-then-id ordering, bounded batches) over rows held in memory.
//! Used by pipeline tests, with switches for connection failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use etl_types::{ChangeRow, EntityKind, EntitySyncJob};

use crate::cursor::{BatchCursor, ChangeSource};
use crate::error::SourceError;

#[derive(Default)]
pub struct MemorySource {
    rows: Mutex<HashMap<EntityKind, Vec<ChangeRow>>>,
    fail_open: Mutex<HashSet<EntityKind>>,
    fail_after: Mutex<HashMap<EntityKind, usize>>,
    open_cursors: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, replacing any row of the same entity type and id.
    pub fn upsert(&self, row: ChangeRow) {
        let mut rows = lock(&self.rows);
        let entries = rows.entry(row.entity()).or_default();
        match entries.iter_mut().find(|r| r.id() == row.id()) {
            Some(existing) => *existing = row,
            None => entries.push(row),
        }
    }

    pub fn upsert_all(&self, rows: impl IntoIterator<Item = ChangeRow>) {
        for row in rows {
            self.upsert(row);
        }
    }

    /// Make `open` fail for an entity type, as if the database were down.
    pub fn set_fail_open(&self, entity: EntityKind, fail: bool) {
        let mut failing = lock(&self.fail_open);
        if fail {
            failing.insert(entity);
        } else {
            failing.remove(&entity);
        }
    }

    /// Make cursors for an entity type fail after serving `batches` batches.
    pub fn fail_after_batches(&self, entity: EntityKind, batches: usize) {
        lock(&self.fail_after).insert(entity, batches);
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_open).clear();
        lock(&self.fail_after).clear();
    }

    /// Cursors opened and not yet closed or dropped.
    pub fn open_cursor_count(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Total number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChangeSource for MemorySource {
    async fn open(
        &self,
        job: &EntitySyncJob,
        since: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Box<dyn BatchCursor>, SourceError> {
        let entity = job.entity();
        if lock(&self.fail_open).contains(&entity) {
            return Err(SourceError::Connection(format!(
                "connection refused while opening {} cursor",
                entity
            )));
        }

        let mut matching: Vec<ChangeRow> = lock(&self.rows)
            .get(&entity)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.last_change_date() > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let batches: VecDeque<Vec<ChangeRow>> = matching
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_cursors.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryCursor {
            batches,
            served: 0,
            fail_after: lock(&self.fail_after).get(&entity).copied(),
            open_cursors: self.open_cursors.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryCursor {
    batches: VecDeque<Vec<ChangeRow>>,
    served: usize,
    fail_after: Option<usize>,
    open_cursors: Arc<AtomicUsize>,
    closed: bool,
}

impl MemoryCursor {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BatchCursor for MemoryCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<ChangeRow>>, SourceError> {
        if self.closed {
            return Ok(None);
        }
        if self.fail_after == Some(self.served) {
            return Err(SourceError::Unavailable(
                "connection lost during fetch".to_string(),
            ));
        }
        let batch = self.batches.pop_front();
        if batch.is_some() {
            self.served += 1;
        }
        Ok(batch)
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use etl_types::GenreRow;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn genre(id: &str, name: &str, day: u32) -> ChangeRow {
        ChangeRow::Genre(GenreRow {
            id: id.to_string(),
            name: Some(name.to_string()),
            description: None,
            films: vec![],
            last_change_date: ts(day),
        })
    }

    async fn drain(cursor: &mut Box<dyn BatchCursor>) -> Vec<Vec<ChangeRow>> {
        let mut batches = Vec::new();
        while let Some(batch) = cursor.next_batch().await.unwrap() {
            batches.push(batch);
        }
        batches
    }

    #[tokio::test]
    async fn test_filters_sorts_and_batches() {
        let source = MemorySource::new();
        source.upsert_all(vec![
            genre("g-3", "Drama", 4),
            genre("g-1", "Action", 1),
            genre("g-2", "Comedy", 3),
            genre("g-4", "Western", 5),
        ]);
        let job = EntitySyncJob::new(EntityKind::Genre);

        let mut cursor = source.open(&job, ts(2), 2).await.unwrap();
        let batches = drain(&mut cursor).await;

        let names: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.iter().map(|r| r.sort_key().0).collect())
            .collect();
        assert_eq!(names, vec![vec!["Comedy", "Drama"], vec!["Western"]]);

        // Exhausted cursors stay exhausted
        assert!(cursor.next_batch().await.unwrap().is_none());
        cursor.close().await.unwrap();
        assert_eq!(source.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let source = MemorySource::new();
        source.upsert(genre("g-1", "Action", 1));
        source.upsert(genre("g-1", "Action & Adventure", 2));

        let job = EntitySyncJob::new(EntityKind::Genre);
        let mut cursor = source.open(&job, ts(1), 10).await.unwrap();
        let batches = drain(&mut cursor).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].sort_key().0, "Action & Adventure");
    }

    #[tokio::test]
    async fn test_other_entities_are_invisible() {
        let source = MemorySource::new();
        source.upsert(genre("g-1", "Action", 1));

        let job = EntitySyncJob::new(EntityKind::Movie);
        let since = ts(1) - chrono::Duration::days(1);
        let mut cursor = source.open(&job, since, 10).await.unwrap();
        assert!(cursor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let source = MemorySource::new();
        source.upsert_all(vec![genre("g-1", "A", 1), genre("g-2", "B", 2)]);
        let job = EntitySyncJob::new(EntityKind::Genre);

        source.set_fail_open(EntityKind::Genre, true);
        assert!(source.open(&job, ts(1) - chrono::Duration::days(1), 1).await.is_err());
        source.set_fail_open(EntityKind::Genre, false);

        source.fail_after_batches(EntityKind::Genre, 1);
        let mut cursor = source
            .open(&job, ts(1) - chrono::Duration::days(1), 1)
            .await
            .unwrap();
        assert!(cursor.next_batch().await.unwrap().is_some());
        assert!(cursor.next_batch().await.is_err());

        drop(cursor);
        assert_eq!(source.open_cursor_count(), 0);
        assert_eq!(source.open_count(), 1);
    }
}
