//! tickd daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `settings`: Layered configuration loading
//! - `jobs`: Built-in jobs (heartbeat, event audit)
//! - `commands`: Command implementations (run, jobs, stop, status)

pub mod cli;
pub mod commands;
pub mod jobs;
pub mod settings;

pub use cli::{Cli, Commands};
pub use commands::{list_jobs, run_daemon, show_status, stop_daemon};
pub use jobs::{register_builtin_jobs, BUILTIN_JOBS, EVENT_AUDIT_JOB, HEARTBEAT_JOB};
pub use settings::{default_config_path, load_config, JobSettings, Settings, TaskLists};
