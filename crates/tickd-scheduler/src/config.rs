//! Scheduler configuration.
//!
//! Provides queue sizing, retry cooldown and debug settings for the
//! scheduler, plus the lookup used to read job allow/deny lists at
//! startup.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Settings key holding the job allow-list.
pub const ENABLED_TASKS_KEY: &str = "tasks.enabled";

/// Settings key holding the job deny-list.
pub const DISABLED_TASKS_KEY: &str = "tasks.disabled";

/// Configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity of the dispatch request queue.
    /// Enqueueing into a full queue waits for space.
    /// Defaults to 100.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the event queue.
    /// Defaults to 100.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Seconds to wait before a failed task is queued again.
    /// Defaults to 30 seconds.
    #[serde(default = "default_retry_cooldown")]
    pub retry_cooldown_secs: u64,

    /// Run job bodies without panic isolation or retry.
    /// Useful locally to get the raw panic output of a broken job.
    #[serde(default)]
    pub debug: bool,

    /// Environment variable consulted as the allow-list when the
    /// configured allow-list is empty. Comma separated.
    #[serde(default = "default_fallback_tasks_env")]
    pub fallback_tasks_env: String,
}

fn default_queue_capacity() -> usize {
    100
}

fn default_event_queue_capacity() -> usize {
    100
}

fn default_retry_cooldown() -> u64 {
    30
}

fn default_fallback_tasks_env() -> String {
    "TICKD_ENABLED_TASKS".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            event_queue_capacity: default_event_queue_capacity(),
            retry_cooldown_secs: default_retry_cooldown(),
            debug: false,
            fallback_tasks_env: default_fallback_tasks_env(),
        }
    }
}

impl SchedulerConfig {
    /// Check the configuration for values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if either queue capacity is zero.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.queue_capacity == 0 {
            return Err(SchedulerError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(SchedulerError::Config(
                "event_queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Cooldown applied before a failed task is retried.
    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }
}

/// Read-only view over the settings the scheduler consults at startup.
///
/// Lookups happen each time enablement is evaluated, so an implementation
/// backed by live configuration sees its current values.
pub trait SettingsLookup: Send + Sync {
    /// Return the string list stored under `key`, or an empty list.
    fn string_list(&self, key: &str) -> Vec<String>;
}

impl SettingsLookup for config::Config {
    fn string_list(&self, key: &str) -> Vec<String> {
        // Environment sources deliver lists as one comma separated string
        if let Ok(items) = self.get::<Vec<String>>(key) {
            return items
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
        }
        self.get_string(key)
            .map(|raw| split_list(&raw))
            .unwrap_or_default()
    }
}

/// In-memory settings, used when no configuration backend is wired in.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    lists: HashMap<String, Vec<String>>,
}

impl StaticSettings {
    /// Create empty settings: no allow-list, no deny-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the list stored under `key`.
    pub fn with_list<I, S>(mut self, key: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lists
            .insert(key.into(), items.into_iter().map(Into::into).collect());
        self
    }

    /// Set the job allow-list.
    pub fn with_enabled<I, S>(self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_list(ENABLED_TASKS_KEY, items)
    }

    /// Set the job deny-list.
    pub fn with_disabled<I, S>(self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_list(DISABLED_TASKS_KEY, items)
    }
}

impl SettingsLookup for StaticSettings {
    fn string_list(&self, key: &str) -> Vec<String> {
        self.lists.get(key).cloned().unwrap_or_default()
    }
}

/// Split a comma separated list, dropping blank entries.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decide whether a job may run.
///
/// The deny-list is checked first and always wins. Otherwise a non-empty
/// allow-list (or, failing that, a non-empty fallback list) must contain
/// the name. With no allow-list anywhere every job is enabled.
pub fn evaluate_enablement(
    name: &str,
    deny: &[String],
    allow: &[String],
    fallback: Option<&[String]>,
) -> bool {
    if deny.iter().any(|denied| denied == name) {
        return false;
    }
    if !allow.is_empty() {
        return allow.iter().any(|allowed| allowed == name);
    }
    match fallback {
        Some(list) if !list.is_empty() => list.iter().any(|allowed| allowed == name),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.event_queue_capacity, 100);
        assert_eq!(config.retry_cooldown_secs, 30);
        assert_eq!(config.retry_cooldown(), Duration::from_secs(30));
        assert!(!config.debug);
        assert_eq!(config.fallback_tasks_env, "TICKD_ENABLED_TASKS");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = SchedulerConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::Config(_))));

        let config = SchedulerConfig {
            event_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_deserialize_partial_config_uses_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"retry_cooldown_secs": 5, "debug": true}"#).unwrap();
        assert_eq!(config.retry_cooldown_secs, 5);
        assert!(config.debug);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.fallback_tasks_env, "TICKD_ENABLED_TASKS");
    }

    #[test]
    fn test_deny_list_wins_over_allow_list() {
        let deny = strings(&["a"]);
        let allow = strings(&["a", "b"]);
        assert!(!evaluate_enablement("a", &deny, &allow, None));
        assert!(evaluate_enablement("b", &deny, &allow, None));
        assert!(!evaluate_enablement("c", &deny, &allow, None));
    }

    #[test]
    fn test_no_lists_enables_everything() {
        assert!(evaluate_enablement("anything", &[], &[], None));
        assert!(evaluate_enablement("", &[], &[], None));
        assert!(evaluate_enablement("x", &[], &[], Some(&[])));
    }

    #[test]
    fn test_fallback_used_only_when_allow_list_empty() {
        let fallback = strings(&["x"]);
        assert!(evaluate_enablement("x", &[], &[], Some(&fallback)));
        assert!(!evaluate_enablement("y", &[], &[], Some(&fallback)));

        // A configured allow-list shadows the fallback
        let allow = strings(&["y"]);
        assert!(evaluate_enablement("y", &[], &allow, Some(&fallback)));
        assert!(!evaluate_enablement("x", &[], &allow, Some(&fallback)));

        // Deny still wins
        let deny = strings(&["x"]);
        assert!(!evaluate_enablement("x", &deny, &[], Some(&fallback)));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c ,"), strings(&["a", "b", "c"]));
        assert!(split_list("").is_empty());
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_static_settings_lookup() {
        let settings = StaticSettings::new()
            .with_enabled(["a", "b"])
            .with_disabled(["c"]);
        assert_eq!(settings.string_list(ENABLED_TASKS_KEY), strings(&["a", "b"]));
        assert_eq!(settings.string_list(DISABLED_TASKS_KEY), strings(&["c"]));
        assert!(settings.string_list("missing").is_empty());
    }

    #[test]
    fn test_config_lookup_reads_arrays_and_strings() {
        let config = config::Config::builder()
            .set_override(ENABLED_TASKS_KEY, vec!["heartbeat", "audit"])
            .unwrap()
            .set_override(DISABLED_TASKS_KEY, "backup, crawler")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            config.string_list(ENABLED_TASKS_KEY),
            strings(&["heartbeat", "audit"])
        );
        assert_eq!(
            config.string_list(DISABLED_TASKS_KEY),
            strings(&["backup", "crawler"])
        );
        assert!(config.string_list("tasks.missing").is_empty());
    }
}
