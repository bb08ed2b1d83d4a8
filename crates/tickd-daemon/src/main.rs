//! tickd
//!
//! Runs registered jobs on their schedules and fans events out to
//! listeners until stopped.
//!
//! # Usage
//!
//! ```bash
//! tickd run [--debug]
//! tickd jobs
//! tickd stop
//! tickd status
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/tickd/config.toml)
//! 3. Environment variables (TICKD_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use tickd_daemon::{list_jobs, run_daemon, show_status, stop_daemon, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { debug } => {
            run_daemon(cli.config.as_deref(), cli.log_level.as_deref(), debug).await?;
        }
        Commands::Jobs => {
            list_jobs(cli.config.as_deref())?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
    }

    Ok(())
}
