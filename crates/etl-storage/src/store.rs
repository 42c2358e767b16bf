//! Watermark store trait and the shared value encoding.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::WatermarkError;

/// Key-value store of per-job watermarks.
///
/// A single orchestrator owns each key, so implementations only need to be
/// safe for concurrent use within one process.
pub trait WatermarkStore: Send + Sync {
    /// Read the watermark for `key`. Unknown keys return `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, WatermarkError>;

    /// Persist the watermark for `key`.
    ///
    /// The value is durable once this returns. Values older than the stored
    /// one are refused with [`WatermarkError::Regression`].
    fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), WatermarkError>;

    /// Remove the watermark for `key`, forcing a full re-sync of that job.
    ///
    /// Returns whether a value was present.
    fn delete(&self, key: &str) -> Result<bool, WatermarkError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Encode a watermark as an ISO-8601 / RFC 3339 UTC string.
pub fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Decode a stored watermark. Any RFC 3339 offset is accepted.
pub fn decode_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>, WatermarkError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| WatermarkError::Corrupt(format!("key '{}': '{}': {}", key, raw, e)))
}

/// Refuse writes that would move `key` backwards.
pub(crate) fn ensure_monotonic(
    key: &str,
    current: Option<DateTime<Utc>>,
    proposed: DateTime<Utc>,
) -> Result<(), WatermarkError> {
    match current {
        Some(current) if proposed < current => Err(WatermarkError::Regression {
            key: key.to_string(),
            current,
            proposed,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode_decode() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        let encoded = encode_timestamp(ts);
        assert_eq!(encoded, "2024-03-09T14:30:00Z");
        assert_eq!(decode_timestamp("k", &encoded).unwrap(), ts);
    }

    #[test]
    fn test_decode_with_offset() {
        let decoded = decode_timestamp("k", "2024-03-09T16:30:00.250000+02:00").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_decode_min_timestamp() {
        let decoded = decode_timestamp("k", "0001-01-01T00:00:00+00:00").unwrap();
        assert_eq!(decoded, Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_timestamp("movie", "yesterday").unwrap_err();
        assert!(matches!(err, WatermarkError::Corrupt(_)));
        assert!(err.to_string().contains("movie"));
    }

    #[test]
    fn test_ensure_monotonic() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        assert!(ensure_monotonic("k", None, early).is_ok());
        assert!(ensure_monotonic("k", Some(early), late).is_ok());
        assert!(ensure_monotonic("k", Some(early), early).is_ok());
        assert!(ensure_monotonic("k", Some(late), early).is_err());
    }
}
