//! In-flight deduplication for task executions.
//!
//! When a task is submitted while another execution with the same identity
//! is still running, the new submission does not run the body again. It
//! waits for the running execution and shares its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::TaskOutcome;

type OutcomeReceiver = watch::Receiver<Option<TaskOutcome>>;

/// Group of running executions keyed by task identity.
///
/// At most one execution per key runs at a time. The entry for a key is
/// removed before its outcome is published, so a submission arriving after
/// completion always starts a fresh execution.
#[derive(Default)]
pub struct InFlightGroup {
    calls: Mutex<HashMap<String, OutcomeReceiver>>,
}

impl InFlightGroup {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` under `key`, or join the execution already running there.
    ///
    /// Returns the outcome and whether it was shared from another
    /// submission rather than produced by `work`. A joined execution that
    /// is torn down without publishing an outcome (its task panicked or was
    /// aborted) is reported as `TaskOutcome::Panicked`.
    pub async fn run<Fut>(&self, key: &str, work: Fut) -> (TaskOutcome, bool)
    where
        Fut: Future<Output = TaskOutcome>,
    {
        let role = {
            let mut calls = self.lock();
            match calls.get(key) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(key.to_string(), rx);
                    Role::Leader(tx)
                }
            }
        };

        let mut rx = match role {
            Role::Leader(tx) => {
                let leader = LeaderGuard {
                    group: self,
                    key,
                    tx: Some(tx),
                };
                let outcome = work.await;
                leader.finish(outcome.clone());
                return (outcome, false);
            }
            Role::Follower(rx) => rx,
        };

        let shared = rx
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone());
        let outcome = match shared {
            Ok(Some(outcome)) => outcome,
            _ => TaskOutcome::Panicked("in-flight execution aborted".to_string()),
        };
        (outcome, true)
    }

    /// Whether an execution is currently running under `key`.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of keys with a running execution.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is running.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OutcomeReceiver>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Role {
    Leader(watch::Sender<Option<TaskOutcome>>),
    Follower(OutcomeReceiver),
}

/// Removes the leader's entry when the execution ends, even by unwinding.
struct LeaderGuard<'a> {
    group: &'a InFlightGroup,
    key: &'a str,
    tx: Option<watch::Sender<Option<TaskOutcome>>>,
}

impl LeaderGuard<'_> {
    fn finish(mut self, outcome: TaskOutcome) {
        self.group.lock().remove(self.key);
        if let Some(tx) = self.tx.take() {
            // No receivers left just means nobody joined
            let _ = tx.send(Some(outcome));
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.group.lock().remove(self.key);
        }
    }
}
