//! Configuration loading for the movies ETL.
//!
//! Layered config, later sources win:
//! defaults -> default config file -> CLI config file -> `ETL_*` env vars -> CLI flags.
//!
//! The default config file lives at `<config dir>/movies-etl/config.toml`.
//! Nested keys use a double underscore in the environment, e.g.
//! `ETL_DATABASE__HOST` or `ETL_ELASTICSEARCH__HOSTS=http://a:9200,http://b:9200`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::{EntityKind, JobRegistry};

const APP_NAME: &str = "movies-etl";

/// Relational source connection settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    /// Never logged; `Debug` prints a redacted placeholder.
    pub password: Option<SecretString>,
    /// Pool size. One cursor is open at a time, so this stays small.
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "movies_database".to_string(),
            user: "app".to_string(),
            password: None,
            max_connections: 2,
            connect_timeout_secs: 10,
        }
    }
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Search engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchSettings {
    /// Base URLs, tried in rotation on retries
    pub hosts: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["http://127.0.0.1:9200".to_string()],
            request_timeout_secs: 30,
        }
    }
}

impl ElasticsearchSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Backoff settings for bulk writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Total time budget for one batch, retries included
    pub max_elapsed_secs: u64,
    /// Optional cap on attempts per batch
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            multiplier: 2.0,
            max_interval_ms: 10_000,
            max_elapsed_secs: 60,
            max_attempts: None,
        }
    }
}

impl RetrySettings {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }

    fn validate(&self) -> Result<(), String> {
        if self.initial_interval_ms == 0 {
            return Err("retry.initial_interval_ms must be > 0".to_string());
        }
        if self.multiplier < 1.0 {
            return Err(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err("retry.max_interval_ms must be >= retry.initial_interval_ms".to_string());
        }
        if self.max_elapsed_secs == 0 {
            return Err("retry.max_elapsed_secs must be > 0".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("retry.max_attempts must be > 0 when set".to_string());
        }
        Ok(())
    }
}

/// Where watermarks are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// Single JSON object file, replaced atomically on every write
    #[default]
    JsonFile,
    /// Embedded RocksDB instance
    Rocksdb,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub backend: StateBackend,
    /// File (json_file) or directory (rocksdb); defaults under the data dir
    pub path: Option<String>,
}

impl StateSettings {
    /// Resolve the storage path, expanding a leading `~/`.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => expand_home(path),
            None => {
                let name = match self.backend {
                    StateBackend::JsonFile => "watermarks.json",
                    StateBackend::Rocksdb => "watermarks-db",
                };
                ProjectDirs::from("", "", APP_NAME)
                    .map(|p| p.data_local_dir().join(name))
                    .unwrap_or_else(|| PathBuf::from(".").join(name))
            }
        }
    }
}

/// One configured job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    pub entity: EntityKind,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub watermark_key: Option<String>,
}

impl JobSettings {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            index: None,
            watermark_key: None,
        }
    }
}

fn default_jobs() -> Vec<JobSettings> {
    EntityKind::DEFAULT_ORDER
        .iter()
        .map(|kind| JobSettings::new(*kind))
        .collect()
}

/// Main application settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub elasticsearch: ElasticsearchSettings,

    /// Rows per cursor fetch and per bulk request
    pub batch_size: usize,

    /// Pause between two passes over all jobs
    pub idle_interval_secs: u64,

    pub retry: RetrySettings,
    pub state: StateSettings,

    /// Jobs in execution order
    pub jobs: Vec<JobSettings>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            elasticsearch: ElasticsearchSettings::default(),
            batch_size: 100,
            idle_interval_secs: 60,
            retry: RetrySettings::default(),
            state: StateSettings::default(),
            jobs: default_jobs(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Default config file (`<config dir>/movies-etl/config.toml`)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (`ETL_*`)
    ///
    /// CLI flags should be applied by the caller after this returns,
    /// followed by [`Settings::validate`].
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ETL")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("elasticsearch.hosts")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Check values that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".to_string()));
        }
        if self.idle_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle_interval_secs must be > 0".to_string(),
            ));
        }
        if self.elasticsearch.hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "elasticsearch.hosts must contain at least one host".to_string(),
            ));
        }
        self.retry.validate().map_err(ConfigError::Invalid)?;
        self.job_registry()?;
        Ok(())
    }

    /// Resolve configured job definitions into the startup registry.
    pub fn job_registry(&self) -> Result<JobRegistry, ConfigError> {
        JobRegistry::from_settings(&self.jobs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.idle_interval_secs, 60);
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.elasticsearch.hosts, vec!["http://127.0.0.1:9200"]);
        assert_eq!(settings.state.backend, StateBackend::JsonFile);
        assert_eq!(settings.retry.initial_interval_ms, 100);
        assert_eq!(settings.retry.max_interval_ms, 10_000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_job_order() {
        let settings = Settings::default();
        let entities: Vec<_> = settings.jobs.iter().map(|j| j.entity).collect();
        assert_eq!(
            entities,
            vec![EntityKind::Person, EntityKind::Genre, EntityKind::Movie]
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("etl.toml");
        std::fs::write(
            &path,
            r#"
batch_size = 25
idle_interval_secs = 5

[database]
host = "db.internal"
password = "s3cret"

[elasticsearch]
hosts = ["http://es-1:9200", "http://es-2:9200"]

[state]
backend = "rocksdb"
path = "/var/lib/etl/state"

[[jobs]]
entity = "movie"
index = "movies_v2"

[[jobs]]
entity = "genre"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.idle_interval_secs, 5);
        assert_eq!(settings.database.host, "db.internal");
        assert_eq!(settings.database.port, 5432);
        assert_eq!(
            settings
                .database
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
        assert_eq!(settings.elasticsearch.hosts.len(), 2);
        assert_eq!(settings.state.backend, StateBackend::Rocksdb);
        assert_eq!(
            settings.state.resolved_path(),
            PathBuf::from("/var/lib/etl/state")
        );

        let registry = settings.job_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.jobs()[0].index(), "movies_v2");
        assert_eq!(registry.jobs()[1].index(), "genres");
    }

    #[test]
    fn test_missing_cli_file_is_error() {
        let result = Settings::load(Some("/nonexistent/etl-config.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.batch_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retry.multiplier = 0.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.elasticsearch.hosts = vec![];
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.jobs.push(JobSettings::new(EntityKind::Movie));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_password_is_redacted() {
        let settings = DatabaseSettings {
            password: Some(SecretString::from("hunter2".to_string())),
            ..Default::default()
        };
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_default_state_path() {
        let state = StateSettings::default();
        assert!(state.resolved_path().ends_with("watermarks.json"));

        let state = StateSettings {
            backend: StateBackend::Rocksdb,
            path: None,
        };
        assert!(state.resolved_path().ends_with("watermarks-db"));
    }
}
