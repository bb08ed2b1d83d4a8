//! Periodic submission of tasks to the dispatch queue.
//!
//! Tickers never call a task directly; they enqueue it and leave overlap
//! prevention and crash isolation to the dispatch loop. Missed ticks are
//! skipped rather than replayed, so a job slower than its interval simply
//! runs less often.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{Scheduler, SchedulerError, Task};

impl Scheduler {
    /// Enqueue `task` every `interval`, starting one interval from now.
    ///
    /// Runs until the scheduler shuts down or its queue closes, so it is
    /// normally driven on its own task (see `spawn_ticker`).
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` for a zero interval.
    pub async fn ticker(&self, interval: Duration, task: Task) -> Result<(), SchedulerError> {
        validate_interval(interval)?;
        self.run_ticker(interval, task, false).await;
        Ok(())
    }

    /// Like `ticker`, but enqueue `task` once immediately so the job runs
    /// at startup instead of after the first interval.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` for a zero interval.
    pub async fn ticker_after_run(
        &self,
        interval: Duration,
        task: Task,
    ) -> Result<(), SchedulerError> {
        validate_interval(interval)?;
        self.run_ticker(interval, task, true).await;
        Ok(())
    }

    /// Drive `ticker` on its own tokio task.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` for a zero interval.
    pub fn spawn_ticker(
        &self,
        interval: Duration,
        task: Task,
    ) -> Result<JoinHandle<()>, SchedulerError> {
        validate_interval(interval)?;
        let scheduler = self.clone();
        Ok(tokio::spawn(async move {
            scheduler.run_ticker(interval, task, false).await;
        }))
    }

    /// Drive `ticker_after_run` on its own tokio task.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidInterval` for a zero interval.
    pub fn spawn_ticker_after_run(
        &self,
        interval: Duration,
        task: Task,
    ) -> Result<JoinHandle<()>, SchedulerError> {
        validate_interval(interval)?;
        let scheduler = self.clone();
        Ok(tokio::spawn(async move {
            scheduler.run_ticker(interval, task, true).await;
        }))
    }

    async fn run_ticker(&self, interval: Duration, task: Task, run_first: bool) {
        let shutdown = self.shutdown_token();
        debug!(task = %task.name(), interval_ms = interval.as_millis() as u64, run_first, "Ticker started");

        if run_first && !self.tick(&task).await {
            return;
        }

        let mut timer = time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if !self.tick(&task).await {
                        return;
                    }
                }
            }
        }

        debug!(task = %task.name(), "Ticker stopped");
    }

    /// Enqueue one tick. Returns `false` once the queue is gone.
    async fn tick(&self, task: &Task) -> bool {
        match self.enqueue(task.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(task = %task.name(), "Ticker stopping: {}", e);
                false
            }
        }
    }
}

fn validate_interval(interval: Duration) -> Result<(), SchedulerError> {
    if interval.is_zero() {
        return Err(SchedulerError::InvalidInterval(format!("{:?}", interval)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::SchedulerConfig;

    fn counting_task(name: &str, counter: &Arc<AtomicU32>) -> Task {
        let counter = counter.clone();
        Task::new(name, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let task = Task::new("noop", || async { Ok(()) });

        let result = scheduler.spawn_ticker(Duration::ZERO, task.clone());
        assert!(matches!(result, Err(SchedulerError::InvalidInterval(_))));

        let result = scheduler.ticker(Duration::ZERO, task).await;
        assert!(matches!(result, Err(SchedulerError::InvalidInterval(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ticker_after_run_fires_immediately() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let ctx = CancellationToken::new();
        scheduler.start(&ctx).unwrap();

        scheduler
            .spawn_ticker_after_run(Duration::from_secs(3600), counting_task("eager", &counter))
            .unwrap();
        scheduler
            .spawn_ticker(Duration::from_secs(3600), counting_task("lazy", &counter))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Only the eager ticker has fired
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_ticker_skips_missed_ticks() {
        let scheduler = Scheduler::new(SchedulerConfig {
            queue_capacity: 1,
            ..Default::default()
        })
        .unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        // No loop drains the queue yet: the tick at 100ms fills it and the
        // tick at 200ms blocks in enqueue
        scheduler
            .spawn_ticker(Duration::from_millis(100), counting_task("slow", &counter))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        scheduler.start(&CancellationToken::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Two queued ticks plus one late tick, not a backlog of eight
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // Back on the 100ms grid from here
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ticker_stops_on_shutdown() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let ctx = CancellationToken::new();
        scheduler.start(&ctx).unwrap();

        let handle = scheduler
            .spawn_ticker(Duration::from_millis(20), counting_task("tick", &counter))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ticker should exit after shutdown")
            .unwrap();
        assert!(counter.load(Ordering::SeqCst) >= 2);
    }
}
