//! Scheduler handle tying registry, dispatch loop and event bus together.
//!
//! One `Scheduler` is built per process (or per test) and passed to job
//! modules at wiring time. Cloning the handle is cheap; all clones share
//! the same queues and registries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchOptions, DispatchQueue};
use crate::{
    Event, EventBus, SchedulerConfig, SchedulerError, SchedulerState, SettingsLookup,
    StaticSettings, Task, TaskRegistry,
};

/// Handle to the process scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    registry: TaskRegistry,
    dispatch: DispatchQueue,
    events: EventBus,
    shutdown_token: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with no allow/deny lists configured.
    ///
    /// The scheduler is created but not started. Call `start()` once every
    /// job has been registered.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_settings(config, Arc::new(StaticSettings::new()))
    }

    /// Create a scheduler that reads job allow/deny lists from `settings`.
    pub fn with_settings(
        config: SchedulerConfig,
        settings: Arc<dyn SettingsLookup>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let registry = TaskRegistry::new(settings, config.fallback_tasks_env.clone());
        let dispatch = DispatchQueue::new(config.queue_capacity);
        let events = EventBus::new(config.event_queue_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                dispatch,
                events,
                shutdown_token: CancellationToken::new(),
                loops: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Register a job binder under `name`.
    ///
    /// Binders are invoked by `start()` in registration order, and only if
    /// the job is enabled.
    pub fn store<F>(&self, name: impl Into<String>, bind: F)
    where
        F: FnOnce(&Scheduler) -> Result<(), SchedulerError> + Send + 'static,
    {
        self.inner.registry.store(name, bind);
    }

    /// Bind enabled jobs, then start the dispatch and event loops.
    ///
    /// Runs once; later calls return `Ok(())` without doing anything. The
    /// loops stop when `ctx` is cancelled or `shutdown()` is called.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::BindFailed` if a binder fails. The loops are
    /// not started in that case and the process is expected to exit.
    pub fn start(&self, ctx: &CancellationToken) -> Result<(), SchedulerError> {
        if !self.inner.registry.begin_start() {
            debug!("Scheduler already started, ignoring");
            return Ok(());
        }

        self.inner.registry.bind_all(self)?;

        let shutdown = self.inner.shutdown_token.clone();
        let parent = ctx.clone();
        let forward = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => forward.cancel(),
                _ = forward.cancelled() => {}
            }
        });

        let options = DispatchOptions {
            retry_cooldown: self.inner.config.retry_cooldown(),
            debug: self.inner.config.debug,
        };
        let mut loops = self.inner.loops.lock().unwrap_or_else(PoisonError::into_inner);
        loops.extend(self.inner.dispatch.spawn_loop(options, shutdown.clone()));
        loops.extend(self.inner.events.spawn_loop(shutdown));

        info!(
            jobs = self.inner.registry.registered().len(),
            debug = self.inner.config.debug,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop both loops and wait for them to exit.
    ///
    /// Executions already running are left to finish on their own.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the loops were never started
    /// or have already been shut down.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let loops = std::mem::take(
            &mut *self.inner.loops.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if loops.is_empty() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.inner.shutdown_token.cancel();

        for handle in loops {
            if let Err(e) = handle.await {
                warn!("Scheduler loop ended abnormally: {}", e);
            }
        }

        info!("Scheduler shutdown complete");
        Ok(())
    }

    /// Token cancelled when the scheduler shuts down.
    ///
    /// Long running job bodies can watch it to exit early.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown_token.clone()
    }

    /// Current state of the dispatch loop.
    pub fn state(&self) -> SchedulerState {
        self.inner.dispatch.state()
    }

    /// Check if the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Get the scheduler configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Names of all registered jobs, in registration order.
    pub fn registered(&self) -> Vec<String> {
        self.inner.registry.registered()
    }

    /// Whether the job named `name` would be bound under current settings.
    pub fn is_task_enabled(&self, name: &str) -> bool {
        self.inner.registry.is_task_enabled(name)
    }

    /// Whether an execution of the task named `name` is running.
    pub fn is_in_flight(&self, name: &str) -> bool {
        self.inner.dispatch.is_in_flight(name)
    }

    /// Queue one execution of `task`, waiting if the queue is full.
    ///
    /// Jobs call this directly to trigger an out-of-band run.
    pub async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        self.inner.dispatch.enqueue(task).await
    }

    /// Queue one execution of `task` without waiting.
    ///
    /// Returns `Ok(false)` if the queue is full and the request was dropped.
    /// Meant for synchronous callers such as event handlers.
    pub fn try_enqueue(&self, task: Task) -> Result<bool, SchedulerError> {
        self.inner.dispatch.try_enqueue(task)
    }

    /// Publish an event built from its parts.
    pub async fn trigger(
        &self,
        name: impl Into<String>,
        metadata: HashMap<String, Value>,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.inner.events.trigger(name, metadata, result, error).await
    }

    /// Publish a prepared event.
    pub async fn publish(&self, event: Event) -> Result<(), SchedulerError> {
        self.inner.events.publish(event).await
    }

    /// Publish a prepared event without waiting.
    pub fn try_publish(&self, event: Event) -> Result<bool, SchedulerError> {
        self.inner.events.try_publish(event)
    }

    /// Subscribe `handler` to `event_name`. First registration of a
    /// `(event_name, subscriber_id)` pair wins; returns `false` otherwise.
    pub fn register_listener<F>(&self, event_name: &str, subscriber_id: &str, handler: F) -> bool
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner
            .events
            .register_listener(event_name, subscriber_id, handler)
    }

    /// Mark a subscription for removal on the next delivery of `event_name`.
    pub fn unregister_listener(&self, event_name: &str, subscriber_id: &str) {
        self.inner
            .events
            .unregister_listener(event_name, subscriber_id);
    }

    /// Number of live subscriptions for `event_name`.
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.inner.events.subscriber_count(event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduler_new() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.registered().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            Scheduler::new(config),
            Err(SchedulerError::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduler_start_stop() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let ctx = CancellationToken::new();

        scheduler.start(&ctx).unwrap();
        assert!(scheduler.is_running());

        // Starting again is a no-op
        scheduler.start(&ctx).unwrap();
        assert!(scheduler.is_running());

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());

        // Shutdown again should fail
        let result = scheduler.shutdown().await;
        assert!(matches!(result, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_before_start() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let result = scheduler.shutdown().await;
        assert!(matches!(result, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parent_cancellation_stops_loops() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let ctx = CancellationToken::new();
        let token = scheduler.shutdown_token();

        scheduler.start(&ctx).unwrap();
        ctx.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(token.is_cancelled());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // Handles are still joined
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_after_shutdown_is_noop() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let ctx = CancellationToken::new();

        scheduler.start(&ctx).unwrap();
        scheduler.shutdown().await.unwrap();

        scheduler.start(&ctx).unwrap();
        assert!(!scheduler.is_running());
        let result = scheduler
            .enqueue(Task::new("late", || async { Ok(()) }))
            .await;
        assert!(matches!(result, Err(SchedulerError::QueueClosed)));
    }
}
