//! RocksDB watermark store.
//!
//! Watermarks live in their own column family, keyed by the raw watermark
//! key and valued with the same ISO-8601 encoding as the JSON file store.
//! Every write is synced to the WAL before returning.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteOptions, DB};
use tracing::{debug, info};

use crate::error::WatermarkError;
use crate::store::{decode_timestamp, encode_timestamp, ensure_monotonic, WatermarkStore};

/// Column family name for job watermarks
pub const CF_WATERMARKS: &str = "watermarks";

pub struct RocksWatermarkStore {
    db: DB,
    /// Serializes read-check-write cycles so monotonicity holds in-process
    write_lock: Mutex<()>,
}

impl RocksWatermarkStore {
    /// Open the store at the given directory, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, WatermarkError> {
        info!("Opening watermark database at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_WATERMARKS,
            Options::default(),
        )];
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn sync_write_options() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    fn read(&self, key: &str) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let cf = self
            .db
            .cf_handle(CF_WATERMARKS)
            .ok_or_else(|| WatermarkError::ColumnFamilyNotFound(CF_WATERMARKS.to_string()))?;

        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let raw = String::from_utf8(bytes)
                    .map_err(|e| WatermarkError::Corrupt(format!("key '{}': {}", key, e)))?;
                decode_timestamp(key, &raw).map(Some)
            }
            None => Ok(None),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, WatermarkError> {
        self.write_lock
            .lock()
            .map_err(|e| WatermarkError::Unavailable(e.to_string()))
    }
}

impl WatermarkStore for RocksWatermarkStore {
    fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        self.read(key)
    }

    fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), WatermarkError> {
        let _guard = self.guard()?;
        ensure_monotonic(key, self.read(key)?, value)?;

        let cf = self
            .db
            .cf_handle(CF_WATERMARKS)
            .ok_or_else(|| WatermarkError::ColumnFamilyNotFound(CF_WATERMARKS.to_string()))?;
        self.db.put_cf_opt(
            &cf,
            key.as_bytes(),
            encode_timestamp(value).as_bytes(),
            &Self::sync_write_options(),
        )?;
        debug!(key = key, watermark = %value, "Saved watermark");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, WatermarkError> {
        let _guard = self.guard()?;
        let existed = self.read(key)?.is_some();

        let cf = self
            .db
            .cf_handle(CF_WATERMARKS)
            .ok_or_else(|| WatermarkError::ColumnFamilyNotFound(CF_WATERMARKS.to_string()))?;
        self.db
            .delete_cf_opt(&cf, key.as_bytes(), &Self::sync_write_options())?;
        Ok(existed)
    }

    fn name(&self) -> &str {
        "rocksdb"
    }
}
