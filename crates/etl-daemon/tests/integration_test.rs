//! Integration tests for the movies-etl command layer.
//!
//! Exercise argument parsing, settings loading and the watermark commands
//! against real stores in temporary directories. Nothing here needs a
//! database or a search cluster.

use std::fs;

use chrono::{TimeZone, Utc};
use clap::Parser;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use etl_daemon::{
    build_pipeline, load_settings, open_watermark_store, reset_watermark, watermark_report, Cli,
    Commands, Overrides,
};
use etl_types::{Settings, StateBackend};

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("movies-etl.toml");
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

fn json_state_config(dir: &TempDir) -> String {
    let state = dir.path().join("state").join("watermarks.json");
    write_config(
        dir,
        &format!(
            "batch_size = 25\n\n[state]\nbackend = \"json_file\"\npath = {:?}\n",
            state.to_string_lossy()
        ),
    )
}

#[test]
fn test_cli_parses_run_flags() {
    let cli = Cli::try_parse_from([
        "movies-etl",
        "--log-level",
        "debug",
        "run",
        "--batch-size",
        "50",
        "--idle-interval",
        "5",
    ])
    .unwrap();

    assert_eq!(cli.log_level.as_deref(), Some("debug"));
    match cli.command {
        Commands::Run {
            batch_size,
            idle_interval,
        } => {
            assert_eq!(batch_size, Some(50));
            assert_eq!(idle_interval, Some(5));
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_cli_parses_reset_and_global_config() {
    let cli = Cli::try_parse_from(["movies-etl", "reset", "genre", "--config", "/tmp/etl.toml"])
        .unwrap();
    assert_eq!(cli.config.as_deref(), Some("/tmp/etl.toml"));
    assert!(matches!(cli.command, Commands::Reset { ref entity } if entity == "genre"));

    assert!(Cli::try_parse_from(["movies-etl", "reset"]).is_err());
    assert!(Cli::try_parse_from(["movies-etl"]).is_err());
}

#[test]
fn test_load_settings_applies_overrides() {
    let dir = TempDir::new().unwrap();
    let config = json_state_config(&dir);

    let settings = load_settings(Some(&config), &Overrides::default()).unwrap();
    assert_eq!(settings.batch_size, 25);
    assert_eq!(settings.state.backend, StateBackend::JsonFile);

    let overrides = Overrides {
        log_level: Some("warn".to_string()),
        batch_size: Some(7),
        idle_interval_secs: Some(3),
    };
    let settings = load_settings(Some(&config), &overrides).unwrap();
    assert_eq!(settings.batch_size, 7);
    assert_eq!(settings.idle_interval_secs, 3);
    assert_eq!(settings.log_level, "warn");
}

#[test]
fn test_load_settings_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let config = json_state_config(&dir);

    let overrides = Overrides {
        batch_size: Some(0),
        ..Default::default()
    };
    assert!(load_settings(Some(&config), &overrides).is_err());

    let duplicate = write_config(
        &dir,
        "[[jobs]]\nentity = \"movie\"\n\n[[jobs]]\nentity = \"movie\"\nindex = \"films\"\n",
    );
    assert!(load_settings(Some(&duplicate), &Overrides::default()).is_err());

    assert!(load_settings(Some("/nonexistent/movies-etl.toml"), &Overrides::default()).is_err());
}

#[test]
fn test_watermark_report_and_reset() {
    let dir = TempDir::new().unwrap();
    let config = json_state_config(&dir);
    let settings = load_settings(Some(&config), &Overrides::default()).unwrap();
    let store = open_watermark_store(&settings.state).unwrap();

    let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    store.set("genre_index_last_sync_state", ts).unwrap();

    let lines = watermark_report(&settings, store.as_ref()).unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("person"));
    assert!(lines[0].ends_with("never"));
    assert!(lines[1].starts_with("genre"));
    assert!(lines[1].ends_with("2024-06-01T12:00:00Z"));

    assert!(reset_watermark(&settings, store.as_ref(), "genres").unwrap());
    assert!(!reset_watermark(&settings, store.as_ref(), "genre").unwrap());
    assert_eq!(store.get("genre_index_last_sync_state").unwrap(), None);

    assert!(reset_watermark(&settings, store.as_ref(), "studio").is_err());
}

#[test]
fn test_reset_requires_configured_job() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("watermarks.json");
    let config = write_config(
        &dir,
        &format!(
            "[state]\npath = {:?}\n\n[[jobs]]\nentity = \"movie\"\n",
            state.to_string_lossy()
        ),
    );
    let settings = load_settings(Some(&config), &Overrides::default()).unwrap();
    let store = open_watermark_store(&settings.state).unwrap();

    assert!(reset_watermark(&settings, store.as_ref(), "person").is_err());
    assert!(!reset_watermark(&settings, store.as_ref(), "movie").unwrap());
}

#[test]
fn test_watermarks_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.state.backend = StateBackend::Rocksdb;
    settings.state.path = Some(dir.path().join("db").to_string_lossy().into_owned());

    let ts = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
    {
        let store = open_watermark_store(&settings.state).unwrap();
        store.set("movie_index_last_sync_state", ts).unwrap();
    }
    let store = open_watermark_store(&settings.state).unwrap();
    assert_eq!(store.get("movie_index_last_sync_state").unwrap(), Some(ts));
}

#[tokio::test]
async fn test_build_pipeline_uses_configured_jobs() {
    let dir = TempDir::new().unwrap();
    let config = json_state_config(&dir);
    let settings = load_settings(Some(&config), &Overrides::default()).unwrap();
    let store = open_watermark_store(&settings.state).unwrap();

    let pipeline = build_pipeline(&settings, store, CancellationToken::new()).unwrap();
    assert_eq!(pipeline.jobs().len(), 3);
    assert_eq!(pipeline.config().batch_size, 25);
}
