//! movies-etl
//!
//! Keeps the `movies`, `genres` and `persons` search indexes in step with
//! the PostgreSQL catalogue.
//!
//! # Usage
//!
//! ```bash
//! movies-etl run [--batch-size N] [--idle-interval SECS]
//! movies-etl once
//! movies-etl watermarks
//! movies-etl reset <movie|genre|person>
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (<config dir>/movies-etl/config.toml)
//! 3. `--config` file
//! 4. Environment variables (ETL_*, e.g. ETL_DATABASE__HOST)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use etl_daemon::{handle_reset, run_daemon, run_once, show_watermarks, Cli, Commands, Overrides};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            batch_size,
            idle_interval,
        } => {
            let overrides = Overrides {
                log_level: cli.log_level,
                batch_size,
                idle_interval_secs: idle_interval,
            };
            run_daemon(cli.config.as_deref(), &overrides).await?;
        }
        Commands::Once { batch_size } => {
            let overrides = Overrides {
                log_level: cli.log_level,
                batch_size,
                idle_interval_secs: None,
            };
            run_once(cli.config.as_deref(), &overrides).await?;
        }
        Commands::Watermarks => {
            show_watermarks(cli.config.as_deref())?;
        }
        Commands::Reset { entity } => {
            handle_reset(cli.config.as_deref(), &entity)?;
        }
    }

    Ok(())
}
