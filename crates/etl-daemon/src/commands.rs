//! Command implementations for movies-etl.
//!
//! Each command loads settings with the usual precedence (defaults, config
//! files, `ETL_*` environment, then CLI flags) and validates them before
//! doing anything else; a bad configuration is the only fatal startup error.

use std::fs;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use etl_pipeline::{PipelineConfig, SyncPipeline};
use etl_sink::{BulkSink, ElasticsearchSink, IndexWriter, RetryConfig};
use etl_source::{ChangeSource, PgChangeSource};
use etl_storage::{
    encode_timestamp, JsonFileWatermarkStore, RocksWatermarkStore, WatermarkStore,
};
use etl_types::{EntityKind, Settings, StateBackend, StateSettings};

/// CLI flags that override loaded settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub batch_size: Option<usize>,
    pub idle_interval_secs: Option<u64>,
}

/// Load, override and validate settings.
pub fn load_settings(config_path: Option<&str>, overrides: &Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(level) = &overrides.log_level {
        settings.log_level = level.clone();
    }
    if let Some(batch_size) = overrides.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(idle) = overrides.idle_interval_secs {
        settings.idle_interval_secs = idle;
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level '{}'", log_level))?;

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the configured watermark backend.
pub fn open_watermark_store(state: &StateSettings) -> Result<Arc<dyn WatermarkStore>> {
    let path = state.resolved_path();
    let store: Arc<dyn WatermarkStore> = match state.backend {
        StateBackend::JsonFile => Arc::new(
            JsonFileWatermarkStore::open(&path).context("Failed to open watermark file")?,
        ),
        StateBackend::Rocksdb => {
            fs::create_dir_all(&path).context("Failed to create watermark directory")?;
            Arc::new(RocksWatermarkStore::open(&path).context("Failed to open watermark database")?)
        }
    };
    Ok(store)
}

/// Wire source, sink and store into a pipeline sharing one shutdown token.
///
/// Must be called inside a Tokio runtime: the database pool starts its
/// maintenance task immediately, even though it connects lazily.
pub fn build_pipeline(
    settings: &Settings,
    store: Arc<dyn WatermarkStore>,
    cancel: CancellationToken,
) -> Result<SyncPipeline> {
    let jobs = settings.job_registry().context("Invalid job definitions")?;

    let source: Arc<dyn ChangeSource> = Arc::new(PgChangeSource::connect_lazy(&settings.database));
    let sink: Arc<dyn BulkSink> = Arc::new(
        ElasticsearchSink::new(&settings.elasticsearch).context("Failed to build index client")?,
    );
    let writer = IndexWriter::new(sink, RetryConfig::from(&settings.retry), cancel.clone());

    Ok(SyncPipeline::new(
        source,
        writer,
        store,
        jobs,
        PipelineConfig::from_settings(settings),
        cancel,
    ))
}

/// Run the sync loop until SIGINT/SIGTERM.
pub async fn run_daemon(config_path: Option<&str>, overrides: &Overrides) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_tracing(&settings.log_level)?;

    info!("movies-etl starting");
    info!("  Elasticsearch: {:?}", settings.elasticsearch.hosts);
    info!(
        "  PostgreSQL: {}:{}/{}",
        settings.database.host, settings.database.port, settings.database.dbname
    );
    info!("  Watermarks: {:?}", settings.state.resolved_path());

    let store = open_watermark_store(&settings.state)?;
    let cancel = CancellationToken::new();
    let pipeline = build_pipeline(&settings, store, cancel.clone())?;

    tokio::spawn(cancel_on_signal(cancel));
    pipeline.run().await;

    info!("movies-etl stopped");
    Ok(())
}

/// Run one pass. Fails if any job failed.
pub async fn run_once(config_path: Option<&str>, overrides: &Overrides) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_tracing(&settings.log_level)?;

    let store = open_watermark_store(&settings.state)?;
    let cancel = CancellationToken::new();
    let pipeline = build_pipeline(&settings, store, cancel.clone())?;

    tokio::spawn(cancel_on_signal(cancel));
    let report = pipeline.run_pass().await;

    for (entity, result) in &report.results {
        match result {
            Ok(job) => println!(
                "{:<8} ok      rows={} batches={} watermark={}",
                entity,
                job.rows,
                job.batches,
                job.committed
                    .map(encode_timestamp)
                    .unwrap_or_else(|| "unchanged".to_string())
            ),
            Err(e) => println!("{:<8} failed  {}", entity, e),
        }
    }

    if report.interrupted {
        bail!("Pass interrupted by shutdown");
    }
    if report.failed() > 0 {
        bail!("{} of {} jobs failed", report.failed(), report.results.len());
    }
    Ok(())
}

/// One line per configured job: entity, index, key and stored watermark.
pub fn watermark_report(settings: &Settings, store: &dyn WatermarkStore) -> Result<Vec<String>> {
    let jobs = settings.job_registry().context("Invalid job definitions")?;
    let mut lines = Vec::with_capacity(jobs.len());

    for job in jobs.jobs() {
        let value = store
            .get(job.watermark_key())
            .with_context(|| format!("Failed to read watermark '{}'", job.watermark_key()))?;
        lines.push(format!(
            "{:<8} {:<10} {:<32} {}",
            job.entity(),
            job.index(),
            job.watermark_key(),
            value
                .map(encode_timestamp)
                .unwrap_or_else(|| "never".to_string())
        ));
    }
    Ok(lines)
}

pub fn show_watermarks(config_path: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, &Overrides::default())?;
    let store = open_watermark_store(&settings.state)?;

    println!("Watermarks ({})", settings.state.resolved_path().display());
    for line in watermark_report(&settings, store.as_ref())? {
        println!("  {}", line);
    }
    Ok(())
}

/// Delete a job's watermark. Returns whether one was stored.
///
/// Must not run while a daemon is using the same store.
pub fn reset_watermark(settings: &Settings, store: &dyn WatermarkStore, entity: &str) -> Result<bool> {
    let kind = EntityKind::from_str(entity)?;
    let jobs = settings.job_registry().context("Invalid job definitions")?;
    let Some(job) = jobs.get(kind) else {
        bail!("No job configured for entity '{}'", kind);
    };

    let existed = store
        .delete(job.watermark_key())
        .with_context(|| format!("Failed to delete watermark '{}'", job.watermark_key()))?;
    Ok(existed)
}

pub fn handle_reset(config_path: Option<&str>, entity: &str) -> Result<()> {
    let settings = load_settings(config_path, &Overrides::default())?;
    let store = open_watermark_store(&settings.state)?;

    if reset_watermark(&settings, store.as_ref(), entity)? {
        println!("Watermark for '{}' removed; next pass re-syncs everything", entity);
    } else {
        println!("No watermark stored for '{}'", entity);
    }
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    shutdown_signal().await;
    cancel.cancel();
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
    warn!("Pending pass abandoned; its watermark is not advanced");
}
