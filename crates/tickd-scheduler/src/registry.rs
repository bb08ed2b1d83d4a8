//! Task registry: ordered job binders and startup enablement.
//!
//! Jobs register a binder under a name before the scheduler starts. On
//! start, binders of enabled jobs are invoked once, in registration order,
//! and wire up their own schedules. Names are not checked for uniqueness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::{evaluate_enablement, split_list, DISABLED_TASKS_KEY, ENABLED_TASKS_KEY};
use crate::{Scheduler, SchedulerError, SettingsLookup};

/// Callback that wires a job's schedule onto the scheduler. Runs once.
pub type Binder = Box<dyn FnOnce(&Scheduler) -> Result<(), SchedulerError> + Send>;

struct JobBinding {
    name: String,
    bind: Option<Binder>,
}

/// Ordered list of job binders plus the allow/deny lookup.
pub struct TaskRegistry {
    bindings: Mutex<Vec<JobBinding>>,
    started: AtomicBool,
    settings: Arc<dyn SettingsLookup>,
    fallback_env: String,
}

impl TaskRegistry {
    /// Create an empty registry reading allow/deny lists from `settings`
    /// and the fallback allow-list from the `fallback_env` variable.
    pub fn new(settings: Arc<dyn SettingsLookup>, fallback_env: impl Into<String>) -> Self {
        Self {
            bindings: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            settings,
            fallback_env: fallback_env.into(),
        }
    }

    /// Append a binder. The binder is not called here.
    pub fn store<F>(&self, name: impl Into<String>, bind: F)
    where
        F: FnOnce(&Scheduler) -> Result<(), SchedulerError> + Send + 'static,
    {
        let name = name.into();
        if self.is_started() {
            warn!(job = %name, "Job registered after startup, it will never be bound");
        }
        self.lock().push(JobBinding {
            name,
            bind: Some(Box::new(bind)),
        });
    }

    /// Names of all registered jobs, in registration order.
    pub fn registered(&self) -> Vec<String> {
        self.lock().iter().map(|b| b.name.clone()).collect()
    }

    /// Whether `start` has been entered.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Decide whether the job named `name` may be bound.
    ///
    /// Lists are looked up on every call so that the current configuration
    /// and environment are used.
    pub fn is_task_enabled(&self, name: &str) -> bool {
        let deny = self.settings.string_list(DISABLED_TASKS_KEY);
        let allow = self.settings.string_list(ENABLED_TASKS_KEY);
        let fallback = if allow.is_empty() {
            std::env::var(&self.fallback_env)
                .ok()
                .map(|raw| split_list(&raw))
        } else {
            None
        };
        evaluate_enablement(name, &deny, &allow, fallback.as_deref())
    }

    /// Flip the one-shot start latch. Returns `false` if already started.
    pub(crate) fn begin_start(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Invoke the binders of enabled jobs, in registration order.
    ///
    /// The first failing binder aborts the walk. A panicking binder is not
    /// caught.
    pub(crate) fn bind_all(&self, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        // Binders run without the lock held so they may call `store`
        let pending: Vec<(String, Binder)> = self
            .lock()
            .iter_mut()
            .filter_map(|b| b.bind.take().map(|bind| (b.name.clone(), bind)))
            .collect();

        for (name, bind) in pending {
            if !self.is_task_enabled(&name) {
                info!(job = %name, "Job disabled, skipping");
                continue;
            }
            debug!(job = %name, "Binding job");
            bind(scheduler).map_err(|e| SchedulerError::BindFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            info!(job = %name, "Job bound");
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JobBinding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SchedulerConfig, StaticSettings};

    fn registry(settings: StaticSettings) -> TaskRegistry {
        TaskRegistry::new(Arc::new(settings), "TICKD_REGISTRY_TEST_UNSET")
    }

    #[test]
    fn test_store_keeps_order_and_duplicates() {
        let registry = registry(StaticSettings::new());
        registry.store("a", |_| Ok(()));
        registry.store("b", |_| Ok(()));
        registry.store("a", |_| Ok(()));
        registry.store("", |_| Ok(()));
        assert_eq!(registry.registered(), vec!["a", "b", "a", ""]);
        assert!(!registry.is_started());
    }

    #[test]
    fn test_enablement_from_settings() {
        let registry = registry(
            StaticSettings::new()
                .with_enabled(["a", "b"])
                .with_disabled(["a"]),
        );
        assert!(!registry.is_task_enabled("a"));
        assert!(registry.is_task_enabled("b"));
        assert!(!registry.is_task_enabled("c"));
    }

    #[test]
    fn test_enablement_without_lists() {
        let registry = registry(StaticSettings::new());
        assert!(registry.is_task_enabled("a"));
        assert!(registry.is_task_enabled("anything"));
    }

    #[test]
    fn test_enablement_env_fallback() {
        let env = "TICKD_REGISTRY_TEST_FALLBACK";
        std::env::set_var(env, "x, z");
        let registry = TaskRegistry::new(Arc::new(StaticSettings::new()), env);
        assert!(registry.is_task_enabled("x"));
        assert!(!registry.is_task_enabled("y"));

        // Read at call time, not cached
        std::env::remove_var(env);
        assert!(registry.is_task_enabled("y"));
    }

    #[test]
    fn test_begin_start_latch() {
        let registry = registry(StaticSettings::new());
        assert!(registry.begin_start());
        assert!(registry.is_started());
        assert!(!registry.begin_start());
    }

    #[tokio::test]
    async fn test_bind_all_stops_at_first_failure() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let registry = registry(StaticSettings::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        registry.store("first", move |_| {
            c.lock().unwrap().push("first");
            Ok(())
        });
        registry.store("broken", |_| {
            Err(SchedulerError::Config("missing credentials".to_string()))
        });
        let c = calls.clone();
        registry.store("never", move |_| {
            c.lock().unwrap().push("never");
            Ok(())
        });

        let err = registry.bind_all(&scheduler).unwrap_err();
        match err {
            SchedulerError::BindFailed { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("missing credentials"));
            }
            other => panic!("Expected BindFailed, got {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), vec!["first"]);
    }
}
