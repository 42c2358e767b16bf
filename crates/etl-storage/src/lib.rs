//! Watermark storage for the movies ETL.
//!
//! A watermark is the `last_change_date` of the newest change that has been
//! fully synchronized for one job. Stores map a job's watermark key to an
//! ISO-8601 timestamp and provide:
//! - Absent keys as `None` (synchronize from the beginning)
//! - Durable writes: a successful `set` survives a crash
//! - Monotonic values: a `set` that would move a key backwards is refused
//!
//! Backends: [`JsonFileWatermarkStore`] (default), [`RocksWatermarkStore`],
//! and [`MemoryWatermarkStore`] for tests.

pub mod error;
pub mod json_file;
pub mod memory;
pub mod rocks;
pub mod store;

pub use error::WatermarkError;
pub use json_file::JsonFileWatermarkStore;
pub use memory::MemoryWatermarkStore;
pub use rocks::RocksWatermarkStore;
pub use store::{decode_timestamp, encode_timestamp, WatermarkStore};
