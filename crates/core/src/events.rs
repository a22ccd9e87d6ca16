//! Typed in-process publish/subscribe.
//!
//! Subscribers are invoked in registration order. A subscriber that panics
//! is logged and skipped; delivery continues to the remaining subscribers.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::error;

/// Identifier returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback type stored by the bus.
pub type Subscriber<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Fan-out of events of type `E` to registered callbacks.
pub struct EventBus<E> {
    name: &'static str,
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber<E>)>,
}

impl<E> EventBus<E> {
    /// Create a bus; `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: 1,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` if the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Deliver `event` to every subscriber. Returns how many returned normally.
    pub fn publish(&self, event: &E) -> usize {
        let mut delivered = 0;
        for (id, callback) in &self.subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(bus = self.name, subscriber = %id, "subscriber panicked"),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
