//! Built-in jobs shipped with the daemon.
//!
//! - **heartbeat**: logs a beat on a fixed interval and raises a
//!   `heartbeat` event carrying a running count
//! - **event-audit**: logs every event raised under the configured names

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tickd_scheduler::{Event, Scheduler, Task};

use crate::settings::JobSettings;

/// Name of the heartbeat job and of the event it raises.
pub const HEARTBEAT_JOB: &str = "heartbeat";

/// Name of the event audit job, also its subscriber id.
pub const EVENT_AUDIT_JOB: &str = "event-audit";

/// Names of every built-in job, in registration order.
pub const BUILTIN_JOBS: [&str; 2] = [HEARTBEAT_JOB, EVENT_AUDIT_JOB];

/// Register all built-in jobs with the scheduler.
pub fn register_builtin_jobs(scheduler: &Scheduler, settings: &JobSettings) {
    let interval = Duration::from_secs(settings.heartbeat_interval_secs);
    scheduler.store(HEARTBEAT_JOB, move |s| {
        s.spawn_ticker_after_run(interval, heartbeat_task(s.clone()))?;
        info!(interval_secs = interval.as_secs(), "Registered heartbeat job");
        Ok(())
    });

    let audited = settings.audit_events.clone();
    scheduler.store(EVENT_AUDIT_JOB, move |s| {
        for event_name in &audited {
            s.register_listener(event_name, EVENT_AUDIT_JOB, log_event);
        }
        info!(events = ?audited, "Registered event audit job");
        Ok(())
    });
}

/// Task that logs a beat and publishes a `heartbeat` event.
pub fn heartbeat_task(scheduler: Scheduler) -> Task {
    let beats = Arc::new(AtomicU64::new(0));
    Task::new(HEARTBEAT_JOB, move || {
        let scheduler = scheduler.clone();
        let beats = beats.clone();
        async move {
            let count = beats.fetch_add(1, Ordering::SeqCst) + 1;
            info!(count, "Heartbeat");
            scheduler
                .publish(Event::new(HEARTBEAT_JOB).with_metadata("count", count))
                .await
                .map_err(|e| e.to_string())
        }
    })
}

fn log_event(event: &Event) {
    match &event.error {
        Some(error) => info!(
            event = %event.name,
            timestamp = %event.timestamp,
            metadata = ?event.metadata,
            error = %error,
            "Event received"
        ),
        None => info!(
            event = %event.name,
            timestamp = %event.timestamp,
            metadata = ?event.metadata,
            result = ?event.result,
            "Event received"
        ),
    }
}
