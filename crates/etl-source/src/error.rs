//! Source error types.

use thiserror::Error;

/// Errors raised while extracting changes.
///
/// Any of these aborts the current stream; the job is retried on the next
/// pass without moving its watermark.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not obtain a connection or start a transaction
    #[error("Source connection error: {0}")]
    Connection(String),

    /// Cursor declaration or fetch failed
    #[error("Source query error: {0}")]
    Query(String),

    /// A column could not be decoded into the row shape
    #[error("Row decode error in column '{column}': {message}")]
    Decode { column: String, message: String },

    /// The cursor was used after it was closed
    #[error("Cursor already closed")]
    Closed,

    /// Injected failure (in-memory source)
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub(crate) fn decode(column: &str, err: impl std::fmt::Display) -> Self {
        SourceError::Decode {
            column: column.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::Connection("connection refused".to_string());
        assert_eq!(err.to_string(), "Source connection error: connection refused");

        let err = SourceError::decode("genres", "invalid type: null");
        assert_eq!(
            err.to_string(),
            "Row decode error in column 'genres': invalid type: null"
        );
    }
}
