//! Search index sink for the movies ETL.
//!
//! ## Key Components
//!
//! - [`BulkSink`]: one bulk upsert call against a named index
//! - [`ElasticsearchSink`]: `_bulk` API over HTTP
//! - [`MemoryIndex`]: in-memory index with injectable failures
//! - [`IndexWriter`]: wraps a sink with bounded exponential backoff
//!
//! Documents are keyed by their source primary key, so a batch that is
//! re-sent after a failure overwrites instead of duplicating.

pub mod elasticsearch;
pub mod error;
pub mod memory;
pub mod sink;
pub mod writer;

pub use elasticsearch::ElasticsearchSink;
pub use error::{DocumentError, SinkError};
pub use memory::{FaultKind, MemoryIndex};
pub use sink::BulkSink;
pub use writer::{IndexWriter, RetryConfig};
