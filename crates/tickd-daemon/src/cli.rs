//! CLI argument parsing for tickd.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// tickd: a job scheduler daemon with an attached event bus
#[derive(Parser, Debug)]
#[command(name = "tickd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/tickd/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler in the foreground until Ctrl+C or SIGTERM
    Run {
        /// Run job bodies without panic isolation or retry
        #[arg(long)]
        debug: bool,
    },

    /// List built-in jobs and whether each is enabled
    Jobs,

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,
}
