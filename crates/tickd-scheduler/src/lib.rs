//! Process scheduler kernel for the tickd daemon.
//!
//! Jobs register a binder once at process start. When the scheduler starts,
//! every enabled binder wires its own periodic schedule through the ticker
//! primitives, which feed a single dispatch loop. The dispatch loop runs each
//! job body on its own task, never lets two executions of the same task kind
//! overlap, and re-queues crashed jobs after a cooldown. A small event bus
//! lets jobs observe each other without compile-time coupling.
//!
//! # Features
//!
//! - Ordered job registration with allow/deny enablement
//! - At most one concurrent execution per task identity
//! - Panic and error isolation with cooldown-then-retry
//! - Interval tickers that skip missed ticks instead of queueing a backlog
//! - Named pub/sub events with lazy unsubscription
//! - Graceful shutdown via `CancellationToken`
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tickd_scheduler::{Scheduler, SchedulerConfig, Task};
//! use tokio_util::sync::CancellationToken;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//!
//! scheduler.store("cleanup", |s| {
//!     s.spawn_ticker_after_run(
//!         Duration::from_secs(300),
//!         Task::new("cleanup", || async { purge_tmp().await }),
//!     )?;
//!     Ok(())
//! });
//!
//! let ctx = CancellationToken::new();
//! scheduler.start(&ctx)?;
//! ```

mod config;
mod dispatch;
mod error;
mod events;
mod inflight;
mod registry;
mod scheduler;
mod task;
mod ticker;

pub use config::{
    evaluate_enablement, SchedulerConfig, SettingsLookup, StaticSettings, DISABLED_TASKS_KEY,
    ENABLED_TASKS_KEY,
};
pub use dispatch::SchedulerState;
pub use error::SchedulerError;
pub use events::{Event, EventBus, EventHandler};
pub use inflight::InFlightGroup;
pub use registry::{Binder, TaskRegistry};
pub use scheduler::Scheduler;
pub use task::{Task, TaskOutcome, TaskResult};
