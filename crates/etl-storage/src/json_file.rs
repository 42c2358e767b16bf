//! JSON file watermark store.
//!
//! State is one JSON object mapping watermark keys to ISO-8601 strings:
//!
//! ```json
//! {"movie_index_last_sync_state": "2024-03-09T14:30:00.123456Z"}
//! ```
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! state file, so a crash leaves either the old or the new state.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::WatermarkError;
use crate::store::{decode_timestamp, encode_timestamp, ensure_monotonic, WatermarkStore};

pub struct JsonFileWatermarkStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl JsonFileWatermarkStore {
    /// Use the state file at `path`, creating parent directories.
    ///
    /// The file itself is created on the first write.
    pub fn open(path: &Path) -> Result<Self, WatermarkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        info!("Using watermark file {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> Result<BTreeMap<String, String>, WatermarkError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_state(&self, state: &BTreeMap<String, String>) -> Result<(), WatermarkError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.tmp_path();

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.sync_parent_dir()?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "watermarks".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> Result<(), WatermarkError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        File::open(parent)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> Result<(), WatermarkError> {
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, WatermarkError> {
        self.lock
            .lock()
            .map_err(|e| WatermarkError::Unavailable(e.to_string()))
    }
}

impl WatermarkStore for JsonFileWatermarkStore {
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let _guard = self.guard()?;
        let state = self.read_state()?;
        state
            .get(key)
            .map(|raw| decode_timestamp(key, raw))
            .transpose()
    }

    fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), WatermarkError> {
        let _guard = self.guard()?;
        let mut state = self.read_state()?;

        let current = state
            .get(key)
            .map(|raw| decode_timestamp(key, raw))
            .transpose()?;
        ensure_monotonic(key, current, value)?;

        state.insert(key.to_string(), encode_timestamp(value));
        self.write_state(&state)?;
        debug!(key = key, watermark = %value, "Saved watermark");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, WatermarkError> {
        let _guard = self.guard()?;
        let mut state = self.read_state()?;
        if state.remove(key).is_none() {
            return Ok(false);
        }
        self.write_state(&state)?;
        debug!(key = key, "Deleted watermark");
        Ok(true)
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn create_store() -> (JsonFileWatermarkStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileWatermarkStore::open(&temp_dir.path().join("state.json")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_get_unknown_key() {
        let (store, _temp) = create_store();
        assert_eq!(store.get("movie_index_last_sync_state").unwrap(), None);
    }

    #[test]
    fn test_set_and_get() {
        let (store, _temp) = create_store();
        store.set("movie", ts(2)).unwrap();
        store.set("genre", ts(5)).unwrap();

        assert_eq!(store.get("movie").unwrap(), Some(ts(2)));
        assert_eq!(store.get("genre").unwrap(), Some(ts(5)));
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");

        let store = JsonFileWatermarkStore::open(&path).unwrap();
        store.set("person", ts(7)).unwrap();
        drop(store);

        let reopened = JsonFileWatermarkStore::open(&path).unwrap();
        assert_eq!(reopened.get("person").unwrap(), Some(ts(7)));
    }

    #[test]
    fn test_file_format() {
        let (store, _temp) = create_store();
        store.set("movie_index_last_sync_state", ts(3)).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            parsed.get("movie_index_last_sync_state").map(String::as_str),
            Some("2024-01-03T00:00:00Z")
        );
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_reads_offset_timestamps() {
        let (store, _temp) = create_store();
        fs::write(
            store.path(),
            r#"{"genre_index_last_sync_state": "2024-01-03T02:00:00+02:00"}"#,
        )
        .unwrap();
        assert_eq!(
            store.get("genre_index_last_sync_state").unwrap(),
            Some(ts(3))
        );
    }

    #[test]
    fn test_refuses_regression() {
        let (store, _temp) = create_store();
        store.set("movie", ts(4)).unwrap();

        let err = store.set("movie", ts(2)).unwrap_err();
        assert!(matches!(err, WatermarkError::Regression { .. }));
        assert_eq!(store.get("movie").unwrap(), Some(ts(4)));

        // Same value is accepted
        store.set("movie", ts(4)).unwrap();
    }

    #[test]
    fn test_delete() {
        let (store, _temp) = create_store();
        store.set("movie", ts(4)).unwrap();
        store.set("genre", ts(1)).unwrap();

        assert!(store.delete("movie").unwrap());
        assert!(!store.delete("movie").unwrap());
        assert_eq!(store.get("movie").unwrap(), None);
        assert_eq!(store.get("genre").unwrap(), Some(ts(1)));

        // After a reset any value can be written again
        store.set("movie", ts(1)).unwrap();
    }

    #[test]
    fn test_corrupt_file() {
        let (store, _temp) = create_store();
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(
            store.get("movie"),
            Err(WatermarkError::Corrupt(_))
        ));
        assert!(store.set("movie", ts(1)).is_err());
    }

    #[test]
    fn test_empty_file_is_empty_state() {
        let (store, _temp) = create_store();
        fs::write(store.path(), "\n").unwrap();
        assert_eq!(store.get("movie").unwrap(), None);
    }
}
