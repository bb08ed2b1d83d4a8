//! Error types for the scheduler crate.
//!
//! Covers startup failures (configuration, job binders), queue shutdown
//! and lifecycle misuse. Failures of scheduled job bodies are not errors
//! here: the dispatch loop contains them and retries.

use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job binder failed during startup
    #[error("Job binder '{name}' failed: {reason}")]
    BindFailed { name: String, reason: String },

    /// The dispatch or event loop has exited and no longer accepts work
    #[error("Scheduler queue is closed")]
    QueueClosed,

    /// Ticker interval must be non-zero
    #[error("Invalid ticker interval: {0}")]
    InvalidInterval(String),

    /// Scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,

    /// Invalid scheduler configuration
    #[error("Invalid scheduler configuration: {0}")]
    Config(String),
}
