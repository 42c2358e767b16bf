//! CLI argument parsing for movies-etl.
//!
//! Flags given here override every other configuration source.

use clap::{Parser, Subcommand};

/// Incremental PostgreSQL to Elasticsearch sync for the movies catalogue.
#[derive(Parser, Debug)]
#[command(name = "movies-etl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides the default <config dir>/movies-etl/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync loop until SIGINT/SIGTERM
    Run {
        /// Override rows per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Override seconds to wait between passes
        #[arg(short, long)]
        idle_interval: Option<u64>,
    },

    /// Run a single pass over every job and exit
    Once {
        /// Override rows per batch
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Print the stored watermark of every configured job
    Watermarks,

    /// Forget a job's watermark so the next pass re-syncs everything
    Reset {
        /// Entity type (movie, genre, person)
        entity: String,
    },
}
