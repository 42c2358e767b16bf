//! movies-etl daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, once, watermarks, reset)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    build_pipeline, handle_reset, init_tracing, load_settings, open_watermark_store,
    reset_watermark, run_daemon, run_once, show_watermarks, watermark_report, Overrides,
};
