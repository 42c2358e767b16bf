//! Sink error types.

use thiserror::Error;

/// One document the index refused.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentError {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// Connection refused, reset, or timed out before a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The cluster answered but cannot take the request right now.
    #[error("Index unavailable (HTTP {status}): {body}")]
    Unavailable { status: u16, body: String },

    /// The request itself was refused.
    #[error("Bulk request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// The request was accepted but some documents failed.
    #[error("{failed} of {total} documents rejected")]
    DocumentErrors {
        failed: usize,
        total: usize,
        errors: Vec<DocumentError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed bulk response: {0}")]
    InvalidResponse(String),

    /// Retry budget spent on a transient failure.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SinkError> },

    #[error("Write cancelled by shutdown")]
    Cancelled,
}

impl SinkError {
    /// Whether a retry of the same batch might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transport(_) | SinkError::Unavailable { .. })
    }
}
