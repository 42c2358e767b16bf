//! In-memory watermark store for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::WatermarkError;
use crate::store::{ensure_monotonic, WatermarkStore};

/// Volatile store with switchable write failures.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    values: Mutex<HashMap<String, DateTime<Utc>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`delete` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), WatermarkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WatermarkError::Unavailable(
                "writes disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn values(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>>, WatermarkError> {
        self.values
            .lock()
            .map_err(|e| WatermarkError::Unavailable(e.to_string()))
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        Ok(self.values()?.get(key).copied())
    }

    fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), WatermarkError> {
        self.check_writable()?;
        let mut values = self.values()?;
        ensure_monotonic(key, values.get(key).copied(), value)?;
        values.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, WatermarkError> {
        self.check_writable()?;
        Ok(self.values()?.remove(key).is_some())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_memory_store() {
        let store = MemoryWatermarkStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", ts).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(ts));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryWatermarkStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store.set_fail_writes(true);
        assert!(matches!(
            store.set("k", ts),
            Err(WatermarkError::Unavailable(_))
        ));
        assert_eq!(store.get("k").unwrap(), None);

        store.set_fail_writes(false);
        store.set("k", ts).unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
