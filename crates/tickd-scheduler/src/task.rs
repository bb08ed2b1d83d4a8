//! Dispatchable units of work.
//!
//! A `Task` pairs a stable name with an async job body. The name is the
//! task identity: two requests carrying the same name are the same kind of
//! work and never execute concurrently.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

/// Result returned by a job body. `Err` carries a human readable reason.
pub type TaskResult = Result<(), String>;

type TaskFn = dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync;

/// One kind of recurring work, cheap to clone and enqueue repeatedly.
#[derive(Clone)]
pub struct Task {
    name: Arc<str>,
    func: Arc<TaskFn>,
}

impl Task {
    /// Create a task from a name and an async body.
    ///
    /// The body is invoked once per execution, so it must produce a fresh
    /// future on every call.
    ///
    /// # Example
    ///
    /// ```
    /// use tickd_scheduler::Task;
    ///
    /// let task = Task::new("ping", || async { Ok(()) });
    /// assert_eq!(task.name(), "ping");
    /// ```
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(move || func().boxed()),
        }
    }

    /// The task identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce the future for one execution of the body.
    pub(crate) fn call(&self) -> BoxFuture<'static, TaskResult> {
        (self.func)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Body returned `Ok`
    Succeeded,
    /// Body returned `Err` with the given reason
    Failed(String),
    /// Body panicked with the given message
    Panicked(String),
}

impl TaskOutcome {
    /// Whether the execution completed without error.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            TaskOutcome::Succeeded => None,
            TaskOutcome::Failed(reason) | TaskOutcome::Panicked(reason) => Some(reason),
        }
    }
}

impl From<TaskResult> for TaskOutcome {
    fn from(result: TaskResult) -> Self {
        match result {
            Ok(()) => TaskOutcome::Succeeded,
            Err(reason) => TaskOutcome::Failed(reason),
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
