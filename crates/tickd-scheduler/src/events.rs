//! Named publish/subscribe events between jobs.
//!
//! Any caller may trigger an event; a single loop drains the bounded event
//! queue and invokes every live subscriber for the event's name. Handlers
//! run synchronously on that loop, so a slow handler delays every later
//! delivery and should hand heavy work off to its own task.
//!
//! Unsubscribing is lazy. `unregister_listener` only marks the subscription;
//! it is removed the next time an event with that name is delivered, and
//! its handler is not invoked for that delivery.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::task::panic_message;
use crate::SchedulerError;

/// Callback invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A named, timestamped message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was triggered
    pub timestamp: DateTime<Utc>,
    /// Topic the event is delivered under
    pub name: String,
    /// Arbitrary key-value payload
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Optional return payload of whatever raised the event
    #[serde(default)]
    pub result: Option<Value>,
    /// Optional failure description
    #[serde(default)]
    pub error: Option<String>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            name: name.into(),
            metadata: HashMap::new(),
            result: None,
            error: None,
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a result payload.
    pub fn with_result(mut self, result: impl Into<Value>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Attach an error description.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Bounded event queue plus the subscriber registry.
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    listeners: Arc<Listeners>,
}

impl EventBus {
    /// Create a bus whose queue holds at most `capacity` pending events.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Queue an event, waiting for space if the queue is full.
    ///
    /// Acceptance is not delivery: the event may still be dropped if the
    /// loop shuts down before reaching it.
    pub async fn publish(&self, event: Event) -> Result<(), SchedulerError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Queue an event without waiting. Returns `Ok(false)` if the queue is full.
    pub fn try_publish(&self, event: Event) -> Result<bool, SchedulerError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(event = %event.name, "Event queue full, event dropped");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::QueueClosed),
        }
    }

    /// Build an event from its parts and queue it.
    pub async fn trigger(
        &self,
        name: impl Into<String>,
        metadata: HashMap<String, Value>,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let event = Event {
            metadata,
            result,
            error,
            ..Event::new(name)
        };
        self.publish(event).await
    }

    /// Subscribe `handler` to `event_name` under `subscriber_id`.
    ///
    /// If the pair is already registered the original handler is kept and
    /// this returns `false`.
    pub fn register_listener<F>(&self, event_name: &str, subscriber_id: &str, handler: F) -> bool
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners
            .register(event_name, subscriber_id, Arc::new(handler))
    }

    /// Mark a subscription for removal on the next delivery of `event_name`.
    pub fn unregister_listener(&self, event_name: &str, subscriber_id: &str) {
        self.listeners.mark_for_removal(event_name, subscriber_id);
    }

    /// Number of live subscriptions for `event_name`, including ones still
    /// waiting for their removal sweep.
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.listeners.count(event_name)
    }

    /// Spawn the delivery loop. Returns `None` if it was already spawned once.
    pub fn spawn_loop(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let listeners = self.listeners.clone();
        Some(tokio::spawn(run_event_loop(rx, listeners, shutdown)))
    }
}

async fn run_event_loop(
    mut rx: mpsc::Receiver<Event>,
    listeners: Arc<Listeners>,
    shutdown: CancellationToken,
) {
    info!("Event loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => listeners.deliver(&event),
                None => break,
            },
        }
    }

    info!("Event loop stopped");
}

/// Live subscriptions and pending removals, keyed by event name.
#[derive(Default)]
struct Listeners {
    live: RwLock<HashMap<String, HashMap<String, EventHandler>>>,
    pending_removal: Mutex<HashMap<String, HashSet<String>>>,
}

impl Listeners {
    fn register(&self, event_name: &str, subscriber_id: &str, handler: EventHandler) -> bool {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        let subscribers = live.entry(event_name.to_string()).or_default();
        if subscribers.contains_key(subscriber_id) {
            debug!(
                event = %event_name,
                subscriber = %subscriber_id,
                "Listener already registered, keeping original"
            );
            return false;
        }
        subscribers.insert(subscriber_id.to_string(), handler);
        debug!(event = %event_name, subscriber = %subscriber_id, "Listener registered");
        true
    }

    fn mark_for_removal(&self, event_name: &str, subscriber_id: &str) {
        self.pending()
            .entry(event_name.to_string())
            .or_default()
            .insert(subscriber_id.to_string());
        debug!(event = %event_name, subscriber = %subscriber_id, "Listener marked for removal");
    }

    fn count(&self, event_name: &str) -> usize {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Sweep pending removals for the event's name, then invoke the rest.
    fn deliver(&self, event: &Event) {
        let handlers: Vec<(String, EventHandler)> = {
            let mut pending = self.pending();
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            let Some(subscribers) = live.get_mut(&event.name) else {
                return;
            };

            if let Some(marked) = pending.get_mut(&event.name) {
                subscribers.retain(|id, _| {
                    if marked.remove(id) {
                        debug!(event = %event.name, subscriber = %id, "Listener removed");
                        false
                    } else {
                        true
                    }
                });
                if marked.is_empty() {
                    pending.remove(&event.name);
                }
            }

            subscribers
                .iter()
                .map(|(id, handler)| (id.clone(), handler.clone()))
                .collect()
        };

        // Locks are released so handlers may (un)register listeners
        for (subscriber_id, handler) in handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!(
                    event = %event.name,
                    subscriber = %subscriber_id,
                    reason = %panic_message(payload.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.pending_removal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
