//! In-memory search index for tests.
//!
//! Stores documents per index keyed by id, so upserts behave like the real
//! index. Faults can be queued for the next calls or made permanent.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use etl_types::IndexDocument;

use crate::error::{DocumentError, SinkError};
use crate::sink::BulkSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Nothing is applied; the call fails with a 503.
    Unavailable,
    /// Nothing is applied; the call fails as a connection error.
    Transport,
    /// Everything but the first document is applied, then the call reports
    /// the first document as rejected.
    RejectFirstDocument,
}

#[derive(Default)]
struct State {
    indexes: HashMap<String, BTreeMap<String, Value>>,
    calls: usize,
    batch_sizes: Vec<usize>,
    queued: VecDeque<FaultKind>,
    always: Option<FaultKind>,
    after: Option<(usize, FaultKind)>,
}

#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls with `fault`, after any already queued.
    pub fn fail_next(&self, count: usize, fault: FaultKind) {
        let mut state = self.lock();
        state.queued.extend(std::iter::repeat(fault).take(count));
    }

    /// Fail every call with `fault` until cleared.
    pub fn fail_always(&self, fault: Option<FaultKind>) {
        self.lock().always = fault;
    }

    /// Let the next `calls` calls through, then fail every later one.
    pub fn fail_after_calls(&self, calls: usize, fault: FaultKind) {
        let mut state = self.lock();
        let threshold = state.calls + calls;
        state.after = Some((threshold, fault));
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.queued.clear();
        state.always = None;
        state.after = None;
    }

    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.lock()
            .indexes
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Number of documents held in `index`.
    pub fn count(&self, index: &str) -> usize {
        self.lock().indexes.get(index).map_or(0, |docs| docs.len())
    }

    /// Document ids in `index`, sorted.
    pub fn ids(&self, index: &str) -> Vec<String> {
        self.lock()
            .indexes
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// All `bulk_upsert` calls, including failed ones.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    /// Document count of every `bulk_upsert` call, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BulkSink for MemoryIndex {
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.calls += 1;
        state.batch_sizes.push(documents.len());

        let scheduled = state
            .after
            .filter(|(threshold, _)| state.calls > *threshold)
            .map(|(_, fault)| fault);
        let fault = state.queued.pop_front().or(state.always).or(scheduled);
        let skip = match fault {
            None => 0,
            Some(FaultKind::Unavailable) => {
                return Err(SinkError::Unavailable {
                    status: 503,
                    body: "cluster_block_exception".to_string(),
                })
            }
            Some(FaultKind::Transport) => {
                return Err(SinkError::Transport("connection reset".to_string()))
            }
            Some(FaultKind::RejectFirstDocument) => 1,
        };

        let docs = state.indexes.entry(index.to_string()).or_default();
        for doc in documents.iter().skip(skip) {
            docs.insert(doc.id.clone(), doc.body.clone());
        }

        match documents.first() {
            Some(first) if skip > 0 => Err(SinkError::DocumentErrors {
                failed: 1,
                total: documents.len(),
                errors: vec![DocumentError {
                    id: first.id.clone(),
                    status: 400,
                    reason: "mapper_parsing_exception".to_string(),
                }],
            }),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn doc(id: &str, title: &str) -> IndexDocument {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        IndexDocument::new(id, json!({ "id": id, "title": title }), ts)
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = MemoryIndex::new();
        index.bulk_upsert("movies", &[doc("m-1", "Heat")]).await.unwrap();
        index
            .bulk_upsert("movies", &[doc("m-1", "Heat (1995)"), doc("m-2", "Ronin")])
            .await
            .unwrap();

        assert_eq!(index.count("movies"), 2);
        assert_eq!(index.get("movies", "m-1").unwrap()["title"], "Heat (1995)");
        assert_eq!(index.batch_sizes(), vec![1, 2]);
        assert_eq!(index.count("genres"), 0);
    }

    #[tokio::test]
    async fn test_queued_faults() {
        let index = MemoryIndex::new();
        index.fail_next(1, FaultKind::Unavailable);

        let err = index.bulk_upsert("movies", &[doc("m-1", "Heat")]).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(index.count("movies"), 0);

        index.bulk_upsert("movies", &[doc("m-1", "Heat")]).await.unwrap();
        assert_eq!(index.count("movies"), 1);
        assert_eq!(index.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fail_after_calls() {
        let index = MemoryIndex::new();
        index.fail_after_calls(1, FaultKind::Transport);

        index.bulk_upsert("movies", &[doc("m-1", "Heat")]).await.unwrap();
        assert!(index.bulk_upsert("movies", &[doc("m-2", "Ronin")]).await.is_err());
        assert!(index.bulk_upsert("movies", &[doc("m-2", "Ronin")]).await.is_err());
        assert_eq!(index.ids("movies"), vec!["m-1".to_string()]);
    }

    #[tokio::test]
    async fn test_reject_first_document() {
        let index = MemoryIndex::new();
        index.fail_always(Some(FaultKind::RejectFirstDocument));

        let err = index
            .bulk_upsert("movies", &[doc("m-1", "Heat"), doc("m-2", "Ronin")])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::DocumentErrors { failed: 1, total: 2, .. }));
        assert_eq!(index.ids("movies"), vec!["m-2".to_string()]);

        index.clear_faults();
        index.bulk_upsert("movies", &[doc("m-1", "Heat")]).await.unwrap();
        assert_eq!(index.count("movies"), 2);
    }
}
