//! # etl-types
//!
//! Shared domain types for the movies ETL.
//!
//! This crate defines the data structures passed between pipeline stages:
//! - Jobs: one [`EntitySyncJob`] per synchronized entity type
//! - Rows: [`ChangeRow`] values as produced by the relational extractor
//! - Documents: [`IndexDocument`] values as consumed by the index writer
//! - Settings: layered configuration for the daemon

pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod row;

pub use config::{
    DatabaseSettings, ElasticsearchSettings, JobSettings, RetrySettings, Settings, StateBackend,
    StateSettings,
};
pub use document::IndexDocument;
pub use error::ConfigError;
pub use job::{EntityKind, EntitySyncJob, JobRegistry};
pub use row::{
    ChangeRow, FilmRef, GenreRef, GenreRow, MovieRow, PersonFilmRef, PersonRef, PersonRow,
};
