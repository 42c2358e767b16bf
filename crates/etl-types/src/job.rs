//! Entity sync jobs and the startup job registry.
//!
//! Every synchronized entity type is a variant of [`EntityKind`]. The
//! registry resolves configured job definitions into immutable
//! [`EntitySyncJob`] values once, at startup.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::JobSettings;
use crate::error::ConfigError;

/// Entity types that can be synchronized into the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Film works, indexed with their genres and credited people
    Movie,
    /// Genres, indexed with the films they classify
    Genre,
    /// People, indexed with the films they took part in
    Person,
}

impl EntityKind {
    /// Default job order used when no jobs are configured.
    pub const DEFAULT_ORDER: [EntityKind; 3] =
        [EntityKind::Person, EntityKind::Genre, EntityKind::Movie];

    /// Stable lowercase name, as used in config files and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Movie => "movie",
            EntityKind::Genre => "genre",
            EntityKind::Person => "person",
        }
    }

    /// Name of the index the entity is written to unless overridden.
    pub fn default_index(&self) -> &'static str {
        match self {
            EntityKind::Movie => "movies",
            EntityKind::Genre => "genres",
            EntityKind::Person => "persons",
        }
    }

    /// Watermark key used unless overridden.
    pub fn default_watermark_key(&self) -> &'static str {
        match self {
            EntityKind::Movie => "movie_index_last_sync_state",
            EntityKind::Genre => "genre_index_last_sync_state",
            EntityKind::Person => "person_index_last_sync_state",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" => Ok(EntityKind::Movie),
            "genre" | "genres" => Ok(EntityKind::Genre),
            "person" | "persons" => Ok(EntityKind::Person),
            other => Err(ConfigError::UnknownEntity(other.to_string())),
        }
    }
}

/// One synchronizable entity type, resolved at startup.
///
/// The extraction query is selected statically by [`EntitySyncJob::entity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySyncJob {
    entity: EntityKind,
    index: String,
    watermark_key: String,
}

impl EntitySyncJob {
    /// Create a job with the default index name and watermark key.
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            index: entity.default_index().to_string(),
            watermark_key: entity.default_watermark_key().to_string(),
        }
    }

    /// Override the target index name.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    /// Override the watermark key.
    pub fn with_watermark_key(mut self, key: impl Into<String>) -> Self {
        self.watermark_key = key.into();
        self
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn watermark_key(&self) -> &str {
        &self.watermark_key
    }
}

/// Ordered, validated set of jobs for the process lifetime.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: Vec<EntitySyncJob>,
}

impl JobRegistry {
    /// Registry with every entity type in default order.
    pub fn with_defaults() -> Self {
        Self {
            jobs: EntityKind::DEFAULT_ORDER
                .iter()
                .map(|kind| EntitySyncJob::new(*kind))
                .collect(),
        }
    }

    /// Build and validate a registry from configured job definitions.
    ///
    /// Fails on an empty list, a repeated entity, or two jobs sharing an
    /// index name or a watermark key.
    pub fn from_settings(settings: &[JobSettings]) -> Result<Self, ConfigError> {
        let jobs = settings
            .iter()
            .map(|s| {
                let mut job = EntitySyncJob::new(s.entity);
                if let Some(index) = &s.index {
                    job = job.with_index(index.trim());
                }
                if let Some(key) = &s.watermark_key {
                    job = job.with_watermark_key(key.trim());
                }
                job
            })
            .collect();
        Self::new(jobs)
    }

    /// Validate an explicit list of jobs.
    pub fn new(jobs: Vec<EntitySyncJob>) -> Result<Self, ConfigError> {
        if jobs.is_empty() {
            return Err(ConfigError::Invalid("no sync jobs configured".to_string()));
        }

        let mut entities = HashSet::new();
        let mut indexes = HashSet::new();
        let mut keys = HashSet::new();

        for job in &jobs {
            if job.index.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' has an empty index name",
                    job.entity
                )));
            }
            if job.watermark_key.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' has an empty watermark key",
                    job.entity
                )));
            }
            if !entities.insert(job.entity) {
                return Err(ConfigError::Invalid(format!(
                    "entity '{}' is configured more than once",
                    job.entity
                )));
            }
            if !indexes.insert(job.index.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "index '{}' is used by more than one job",
                    job.index
                )));
            }
            if !keys.insert(job.watermark_key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "watermark key '{}' is used by more than one job",
                    job.watermark_key
                )));
            }
        }

        Ok(Self { jobs })
    }

    /// Jobs in execution order.
    pub fn jobs(&self) -> &[EntitySyncJob] {
        &self.jobs
    }

    /// Look up the job for an entity type.
    pub fn get(&self, entity: EntityKind) -> Option<&EntitySyncJob> {
        self.jobs.iter().find(|job| job.entity == entity)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
