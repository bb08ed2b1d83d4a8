//! Configuration loading for the tickd daemon.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/tickd/config.toml.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use tickd_scheduler::{SchedulerConfig, SchedulerError};

/// Settings for the built-in jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Seconds between heartbeats (default: 60)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Event names the audit job logs (default: ["heartbeat"])
    #[serde(default = "default_audit_events")]
    pub audit_events: Vec<String>,
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_audit_events() -> Vec<String> {
    vec!["heartbeat".to_string()]
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            audit_events: default_audit_events(),
        }
    }
}

/// Job allow/deny lists.
///
/// Enablement reads these keys straight from the loaded `Config`; this copy
/// is what `tickd jobs` prints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskLists {
    /// Only these jobs run, when non-empty
    #[serde(default)]
    pub enabled: Vec<String>,

    /// These jobs never run
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Main daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scheduler queue, retry and debug settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Job allow/deny lists
    #[serde(default)]
    pub tasks: TaskLists,

    /// Built-in job settings
    #[serde(default)]
    pub jobs: JobSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
            tasks: TaskLists::default(),
            jobs: JobSettings::default(),
        }
    }
}

/// Default config file location, without extension.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "tickd")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}

/// Build the layered configuration:
/// 1. Built-in defaults
/// 2. Config file (~/.config/tickd/config.toml)
/// 3. CLI-specified config file (optional)
/// 4. Environment variables (TICKD_*)
///
/// CLI flags should be applied by the caller after this returns.
pub fn load_config(cli_config_path: Option<&str>) -> Result<Config, SchedulerError> {
    let mut builder = Config::builder()
        // 1. Built-in defaults
        .set_default("log_level", default_log_level())
        .map_err(|e| SchedulerError::Config(e.to_string()))?
        .set_default(
            "jobs.heartbeat_interval_secs",
            default_heartbeat_interval() as i64,
        )
        .map_err(|e| SchedulerError::Config(e.to_string()))?
        // 2. Default config file
        .add_source(File::with_name(&default_config_path().to_string_lossy()).required(false));

    // 3. CLI-specified config file (higher precedence than default)
    if let Some(path) = cli_config_path {
        builder = builder.add_source(File::with_name(path).required(true));
    }

    // 4. Environment variables (highest precedence before CLI flags)
    // Format: TICKD_LOG_LEVEL, TICKD_SCHEDULER__DEBUG, TICKD_TASKS__ENABLED=a,b
    builder = builder.add_source(
        Environment::with_prefix("TICKD")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tasks.enabled")
            .with_list_parse_key("tasks.disabled")
            .with_list_parse_key("jobs.audit_events")
            .try_parsing(true),
    );

    builder
        .build()
        .map_err(|e| SchedulerError::Config(e.to_string()))
}

impl Settings {
    /// Load settings with layered precedence (see `load_config`).
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SchedulerError> {
        Self::from_config(&load_config(cli_config_path)?)
    }

    /// Deserialize settings from an already built configuration.
    pub fn from_config(config: &Config) -> Result<Self, SchedulerError> {
        config
            .clone()
            .try_deserialize()
            .map_err(|e| SchedulerError::Config(e.to_string()))
    }
}
