//! Watermark storage error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while reading or persisting watermarks
#[derive(Error, Debug)]
pub enum WatermarkError {
    /// Filesystem operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Stored state could not be decoded
    #[error("Corrupt watermark state: {0}")]
    Corrupt(String),

    /// A write would move a watermark backwards
    #[error("Watermark for '{key}' would regress from {current} to {proposed}")]
    Regression {
        key: String,
        current: DateTime<Utc>,
        proposed: DateTime<Utc>,
    },

    /// Store refused the write (test doubles, read-only stores)
    #[error("Watermark store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for WatermarkError {
    fn from(err: serde_json::Error) -> Self {
        WatermarkError::Corrupt(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_error_display() {
        let err = WatermarkError::Corrupt("expected object".to_string());
        assert_eq!(err.to_string(), "Corrupt watermark state: expected object");

        let err = WatermarkError::Regression {
            key: "movie".to_string(),
            current: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            proposed: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        assert!(err.to_string().starts_with("Watermark for 'movie' would regress"));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: WatermarkError = json_err.into();
        assert!(matches!(err, WatermarkError::Corrupt(_)));
    }
}
