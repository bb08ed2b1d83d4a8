//! Integration tests for daemon configuration.
//!
//! These load real TOML files from disk and check that the job lists they
//! carry reach the scheduler.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tickd_daemon::{load_config, register_builtin_jobs, Settings, EVENT_AUDIT_JOB, HEARTBEAT_JOB};
use tickd_scheduler::{Scheduler, SettingsLookup, DISABLED_TASKS_KEY, ENABLED_TASKS_KEY};

/// Write `contents` to a config.toml inside a fresh temp dir.
fn write_config(contents: &str) -> (TempDir, String) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).expect("Failed to write config");
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

#[test]
fn test_load_settings_from_file() {
    let (_dir, path) = write_config(
        r#"
log_level = "warn"

[scheduler]
queue_capacity = 10
retry_cooldown_secs = 2

[tasks]
enabled = ["heartbeat", "event-audit"]
disabled = ["event-audit"]

[jobs]
heartbeat_interval_secs = 5
audit_events = ["heartbeat", "backup"]
"#,
    );

    let config = load_config(Some(&path)).unwrap();
    let settings = Settings::from_config(&config).unwrap();

    assert_eq!(settings.log_level, "warn");
    assert_eq!(settings.scheduler.queue_capacity, 10);
    assert_eq!(settings.scheduler.retry_cooldown_secs, 2);
    assert_eq!(settings.scheduler.event_queue_capacity, 100);
    assert_eq!(settings.tasks.enabled, vec!["heartbeat", "event-audit"]);
    assert_eq!(settings.tasks.disabled, vec!["event-audit"]);
    assert_eq!(settings.jobs.heartbeat_interval_secs, 5);
    assert_eq!(settings.jobs.audit_events, vec!["heartbeat", "backup"]);

    assert_eq!(
        config.string_list(ENABLED_TASKS_KEY),
        vec!["heartbeat", "event-audit"]
    );
    assert_eq!(config.string_list(DISABLED_TASKS_KEY), vec!["event-audit"]);
}

#[test]
fn test_missing_sections_use_defaults() {
    let (_dir, path) = write_config("log_level = \"debug\"\n");

    let settings = Settings::from_config(&load_config(Some(&path)).unwrap()).unwrap();

    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.scheduler.queue_capacity, 100);
    assert_eq!(settings.jobs.heartbeat_interval_secs, 60);
    assert!(settings.tasks.enabled.is_empty());
}

#[test]
fn test_missing_cli_config_file_is_an_error() {
    assert!(load_config(Some("/nonexistent/tickd/config.toml")).is_err());
}

#[test]
fn test_invalid_scheduler_config_rejected() {
    let (_dir, path) = write_config("[scheduler]\nqueue_capacity = 0\n");

    let config = load_config(Some(&path)).unwrap();
    let settings = Settings::from_config(&config).unwrap();
    assert!(Scheduler::with_settings(settings.scheduler, Arc::new(config)).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_config_deny_list_skips_job_at_startup() {
    let (_dir, path) = write_config(
        r#"
[tasks]
disabled = ["heartbeat"]
"#,
    );

    let config = load_config(Some(&path)).unwrap();
    let settings = Settings::from_config(&config).unwrap();
    let scheduler = Scheduler::with_settings(settings.scheduler.clone(), Arc::new(config)).unwrap();
    register_builtin_jobs(&scheduler, &settings.jobs);

    assert!(!scheduler.is_task_enabled(HEARTBEAT_JOB));
    assert!(scheduler.is_task_enabled(EVENT_AUDIT_JOB));

    scheduler.start(&CancellationToken::new()).unwrap();

    // Only the audit listener exists, and no heartbeat ever runs
    assert_eq!(scheduler.subscriber_count(HEARTBEAT_JOB), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!scheduler.is_in_flight(HEARTBEAT_JOB));

    scheduler.shutdown().await.unwrap();
}
