//! Index-ready documents.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A transformed document ready for a bulk upsert.
///
/// `id` equals the source primary key, so re-sending the same entity
/// overwrites the indexed copy instead of duplicating it.
/// `last_change_date` travels alongside the body so the pipeline can
/// advance its watermark without re-reading the body.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub body: Value,
    pub last_change_date: DateTime<Utc>,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, body: Value, last_change_date: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            body,
            last_change_date,
        }
    }

    /// Serialized body, as sent to the index.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_document_bytes() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let doc = IndexDocument::new("m-1", json!({"id": "m-1", "title": "Heat"}), ts);
        let bytes = doc.to_bytes().unwrap();
        let decoded: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded["title"], "Heat");
        assert_eq!(doc.id, "m-1");
    }
}
