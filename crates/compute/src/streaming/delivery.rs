//! Result buffering and subscriber delivery.
//!
//! Results accumulate in a [`ResultBuffer`] and are flushed when the buffer
//! fills or the flush interval elapses, whichever comes first. A flush groups
//! results by stream and hands each subscription at most one delivery.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rota_core::SubscriptionId;
use tracing::error;

use super::types::{ItemResult, StreamDelivery, SubscribeOptions};

/// Bounded accumulator of `(stream_id, result)` pairs.
///
/// Reaching capacity asks for a flush; nothing is ever dropped.
#[derive(Debug)]
pub struct ResultBuffer {
    entries: Vec<(String, ItemResult)>,
    capacity: usize,
    max_wait: Duration,
    batch_started: Option<Instant>,
}

impl ResultBuffer {
    pub fn new(capacity: usize, max_wait: Duration) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            max_wait,
            batch_started: None,
        }
    }

    /// Add one result. Starts the batch timer on the first push.
    pub fn push(&mut self, stream_id: &str, result: ItemResult, now: Instant) {
        if self.batch_started.is_none() {
            self.batch_started = Some(now);
        }
        self.entries.push((stream_id.to_string(), result));
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Full, or the oldest buffered result has waited `max_wait`.
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        if self.is_full() {
            return true;
        }
        self.batch_started
            .is_some_and(|started| now.saturating_duration_since(started) >= self.max_wait)
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take every buffered result, grouped by stream in arrival order.
    pub fn drain_grouped(&mut self) -> HashMap<String, Vec<ItemResult>> {
        self.batch_started = None;
        let mut grouped: HashMap<String, Vec<ItemResult>> = HashMap::new();
        for (stream_id, result) in self.entries.drain(..) {
            grouped.entry(stream_id).or_default().push(result);
        }
        grouped
    }

    /// Whether any buffered result belongs to `stream_id`.
    pub fn holds(&self, stream_id: &str) -> bool {
        self.entries.iter().any(|(s, _)| s == stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type DeliveryCallback = Box<dyn Fn(&StreamDelivery) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    stream_id: String,
    callback: DeliveryCallback,
    options: SubscribeOptions,
    last_delivery: Option<Instant>,
    /// Results held back by throttle or `include_partial = false`.
    pending: Vec<ItemResult>,
    /// The finishing delivery has been made.
    closed: bool,
}

impl Subscription {
    fn due(&self, finished: bool, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        if finished {
            return true;
        }
        if !self.options.include_partial || self.pending.is_empty() {
            return false;
        }
        self.last_delivery
            .map_or(true, |last| now.saturating_duration_since(last) >= self.options.throttle)
    }

    /// Hand over everything pending. Returns how many results went out.
    fn send(&mut self, finished: bool, now: Instant) -> usize {
        let delivery = StreamDelivery {
            stream_id: self.stream_id.clone(),
            results: std::mem::take(&mut self.pending),
            finished,
        };
        self.last_delivery = Some(now);
        self.closed = finished;

        let callback = &self.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(&delivery))).is_err() {
            error!(stream_id = %self.stream_id, subscriber = %self.id, "stream subscriber panicked");
        }
        delivery.results.len()
    }
}

/// All subscriptions, across streams.
pub struct Subscriptions {
    next_id: u64,
    subs: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            subs: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        stream_id: &str,
        callback: DeliveryCallback,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subs.push(Subscription {
            id,
            stream_id: stream_id.to_string(),
            callback,
            options,
            last_delivery: None,
            pending: Vec::new(),
            closed: false,
        });
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.subs.len();
        self.subs.retain(|s| s.id != id);
        self.subs.len() != before
    }

    /// Drop every subscription to `stream_id`.
    pub fn remove_stream(&mut self, stream_id: &str) {
        self.subs.retain(|s| s.stream_id != stream_id);
    }

    /// A stream id is being reused; subscriptions that already got their
    /// final delivery belong to the previous run.
    pub fn reopen_stream(&mut self, stream_id: &str) {
        self.subs.retain(|s| !(s.closed && s.stream_id == stream_id));
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Hand `grouped` results to subscribers. Each subscription is invoked at
    /// most once, and only when it has results to receive. Returns how many
    /// results were delivered in total.
    pub fn deliver(
        &mut self,
        grouped: &HashMap<String, Vec<ItemResult>>,
        finished: &HashSet<String>,
        now: Instant,
    ) -> usize {
        let mut delivered = 0;
        for sub in &mut self.subs {
            if sub.closed {
                continue;
            }
            if let Some(results) = grouped.get(&sub.stream_id) {
                sub.pending.extend(results.iter().cloned());
            }
            if sub.pending.is_empty() {
                continue;
            }
            let is_finished = finished.contains(&sub.stream_id);
            if sub.due(is_finished, now) {
                delivered += sub.send(is_finished, now);
            }
        }
        delivered
    }

    /// Give every open subscription to a finished stream its last delivery:
    /// whatever was held back, with `finished` set.
    pub fn finish_stream(&mut self, stream_id: &str, now: Instant) -> usize {
        self.subs
            .iter_mut()
            .filter(|s| !s.closed && s.stream_id == stream_id)
            .map(|s| s.send(true, now))
            .sum()
    }
}
