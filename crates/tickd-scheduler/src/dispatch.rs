//! Dispatch loop: the single consumer of task requests.
//!
//! Requests are pulled from a bounded queue in arrival order. Each one is
//! handed to its own tokio task, which runs the body through the in-flight
//! group so that two executions of the same task never overlap. A body that
//! panics or returns `Err` is logged and queued again after the retry
//! cooldown.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::task::panic_message;
use crate::{InFlightGroup, SchedulerError, Task, TaskOutcome};

/// Lifecycle state of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    /// Not consuming requests (never started, or cancelled)
    Stopped,
    /// Consuming and executing requests
    Running,
}

/// Options the loop hands to every execution it spawns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchOptions {
    pub retry_cooldown: Duration,
    pub debug: bool,
}

/// Bounded request queue plus the state shared with the loop.
pub(crate) struct DispatchQueue {
    tx: mpsc::Sender<Task>,
    rx: Mutex<Option<mpsc::Receiver<Task>>>,
    inflight: Arc<InFlightGroup>,
    running: Arc<AtomicBool>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            inflight: Arc::new(InFlightGroup::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a task, waiting for space if the queue is full.
    pub async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        self.tx
            .send(task)
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Queue a task without waiting. Returns `Ok(false)` if the queue is full.
    pub fn try_enqueue(&self, task: Task) -> Result<bool, SchedulerError> {
        match self.tx.try_send(task) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(task)) => {
                debug!(task = %task.name(), "Dispatch queue full, request dropped");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::QueueClosed),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.inflight.is_in_flight(name)
    }

    /// Spawn the loop. Returns `None` if it was already spawned once.
    pub fn spawn_loop(
        &self,
        options: DispatchOptions,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let ctx = DispatchContext {
            tx: self.tx.clone(),
            inflight: self.inflight.clone(),
            options,
            shutdown,
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        Some(tokio::spawn(async move {
            run_dispatch_loop(rx, ctx).await;
            running.store(false, Ordering::SeqCst);
        }))
    }
}

/// Everything a spawned execution needs, cloned per request.
#[derive(Clone)]
struct DispatchContext {
    tx: mpsc::Sender<Task>,
    inflight: Arc<InFlightGroup>,
    options: DispatchOptions,
    shutdown: CancellationToken,
}

async fn run_dispatch_loop(mut rx: mpsc::Receiver<Task>, ctx: DispatchContext) {
    info!(debug = ctx.options.debug, "Dispatch loop started");

    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(task) => dispatch(task, &ctx),
                None => break,
            },
        }
    }

    info!("Dispatch loop stopped");
}

/// Hand one request to its own task and return immediately.
fn dispatch(task: Task, ctx: &DispatchContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let name = task.name().to_string();
        let body = task.clone();
        let debug_mode = ctx.options.debug;
        let start = Instant::now();

        let (outcome, shared) = ctx
            .inflight
            .run(&name, async move {
                if debug_mode {
                    execute_unguarded(&body).await
                } else {
                    execute_isolated(&body).await
                }
            })
            .await;

        if shared {
            debug!(task = %name, "Joined in-flight execution");
            return;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome.reason() {
            None => debug!(task = %name, duration_ms, "Task completed"),
            Some(reason) if debug_mode => {
                error!(task = %name, reason = %reason, duration_ms, "Task failed");
            }
            Some(reason) => {
                error!(
                    task = %name,
                    reason = %reason,
                    duration_ms,
                    retry_in_secs = ctx.options.retry_cooldown.as_secs(),
                    "Task failed, scheduling retry"
                );
                schedule_retry(task, &ctx);
            }
        }
    });
}

/// Run the body, converting panics into `TaskOutcome::Panicked`.
async fn execute_isolated(task: &Task) -> TaskOutcome {
    match AssertUnwindSafe(async { task.call().await })
        .catch_unwind()
        .await
    {
        Ok(result) => TaskOutcome::from(result),
        Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

/// Run the body and let a panic unwind the execution's task.
async fn execute_unguarded(task: &Task) -> TaskOutcome {
    TaskOutcome::from(task.call().await)
}

/// Queue the task again once the cooldown has passed.
fn schedule_retry(task: Task, ctx: &DispatchContext) {
    let tx = ctx.tx.clone();
    let shutdown = ctx.shutdown.clone();
    let cooldown = ctx.options.retry_cooldown;

    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(task = %task.name(), "Retry abandoned, scheduler shutting down");
            }
            _ = tokio::time::sleep(cooldown) => {
                let name = task.name().to_string();
                if tx.send(task).await.is_err() {
                    warn!(task = %name, "Retry dropped, dispatch queue closed");
                } else {
                    debug!(task = %name, "Retry queued");
                }
            }
        }
    });
}
