//! Change extraction for the movies ETL.
//!
//! A [`ChangeSource`] opens a forward-only [`BatchCursor`] over every entity
//! of one job whose `last_change_date` is newer than a watermark. The
//! cursor is pulled explicitly with [`BatchCursor::next_batch`] until it
//! returns `None`, then closed.
//!
//! ## Key Components
//!
//! - [`PgChangeSource`]: PostgreSQL server-side cursor over the aggregated job query
//! - [`MemorySource`]: in-memory rows with the same filtering, ordering and batching
//! - [`queries`]: the per-entity extraction SQL

pub mod cursor;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod queries;

pub use cursor::{BatchCursor, ChangeSource};
pub use error::SourceError;
pub use memory::MemorySource;
pub use postgres::PgChangeSource;
