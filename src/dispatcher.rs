//! Fan-out of validated chat payloads to subscribers.
//!
//! Handlers run synchronously, in registration order. A handler that returns an
//! error or panics is reported on the error side channel and the remaining
//! handlers still receive the payload.

use anyhow::Result;
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

use crate::models::ChatPayload;

pub type Handler = Arc<dyn Fn(&ChatPayload) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// A subscriber that failed while handling a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub subscriber: SubscriberId,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(SubscriberId, Handler)>,
    failures: Option<mpsc::UnboundedSender<DispatchFailure>>,
}

#[derive(Default)]
pub struct Dispatcher {
    registry: Mutex<Registry>,
}

/// Capability returned by [`Dispatcher::subscribe`]. Dropping it leaves the
/// handler registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: SubscriberId,
    dispatcher: Weak<Dispatcher>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Returns false if the handler was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.remove(self.id),
            None => false,
        }
    }
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Handlers never run under the lock, so a poisoned registry is still consistent
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&ChatPayload) -> Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = SubscriberId(registry.next_id);
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));
        debug!("Registered subscriber {:?} ({} total)", id, registry.handlers.len());

        Subscription {
            id,
            dispatcher: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let mut registry = self.registry();
        let before = registry.handlers.len();
        registry.handlers.retain(|(existing, _)| *existing != id);
        before != registry.handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().handlers.len()
    }

    /// Open the failure side channel. Replaces any previous receiver.
    pub fn failure_reports(&self) -> mpsc::UnboundedReceiver<DispatchFailure> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry().failures = Some(tx);
        rx
    }

    pub fn dispatch(&self, payload: &ChatPayload) -> DispatchSummary {
        // Snapshot so handlers may subscribe/unsubscribe while we deliver
        let (handlers, failures) = {
            let registry = self.registry();
            (registry.handlers.clone(), registry.failures.clone())
        };

        let mut summary = DispatchSummary::default();
        for (id, handler) in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    summary.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            summary.failed += 1;
            error!("Subscriber {:?} failed to handle message from {}: {}", id, payload.from, reason);
            if let Some(tx) = &failures {
                let _ = tx.send(DispatchFailure { subscriber: id, reason });
            }
        }
        summary
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
