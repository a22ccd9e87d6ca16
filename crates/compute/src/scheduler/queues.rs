use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rota_core::{PerLevel, Priority};
use serde_json::Value;

use super::task::TaskProcessor;
use super::types::{CancellationFlag, TaskId, TaskMetadata};

/// A task while it is owned by the scheduler.
pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub priority: Priority,
    pub payload: Arc<Value>,
    pub processor: Box<dyn TaskProcessor>,
    pub metadata: TaskMetadata,
    pub queued_at: Instant,
    /// Set on first dispatch; total duration is measured from here.
    pub started_at: Option<Instant>,
    pub failure_count: u32,
    pub interruptions: u32,
    pub cancellation: CancellationFlag,
}

/// Five FIFO queues, one per level, plus the last time each was serviced.
pub(crate) struct PriorityQueues {
    queues: [VecDeque<QueuedTask>; 5],
    last_serviced: [Instant; 5],
}

impl PriorityQueues {
    pub fn new(now: Instant) -> Self {
        Self {
            queues: Default::default(),
            last_serviced: [now; 5],
        }
    }

    /// Append to the tail of the task's level. Returns the zero-based position.
    pub fn push_back(&mut self, task: QueuedTask) -> usize {
        let q = &mut self.queues[task.priority.index()];
        q.push_back(task);
        q.len() - 1
    }

    /// Requeue at the head so the task continues before its peers.
    pub fn push_front(&mut self, task: QueuedTask) {
        self.queues[task.priority.index()].push_front(task);
    }

    pub fn pop_front(&mut self, level: Priority) -> Option<QueuedTask> {
        self.queues[level.index()].pop_front()
    }

    /// Remove a queued task by id, wherever it sits.
    pub fn remove(&mut self, id: &TaskId) -> Option<QueuedTask> {
        for q in self.queues.iter_mut() {
            if let Some(pos) = q.iter().position(|t| &t.id == id) {
                return q.remove(pos);
            }
        }
        None
    }

    pub fn len(&self, level: Priority) -> usize {
        self.queues[level.index()].len()
    }

    pub fn total(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn ids(&self, level: Priority) -> impl Iterator<Item = &TaskId> {
        self.queues[level.index()].iter().map(|t| &t.id)
    }

    pub fn since_serviced(&self, level: Priority, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_serviced[level.index()])
    }

    pub fn mark_serviced(&mut self, level: Priority, now: Instant) {
        self.last_serviced[level.index()] = now;
    }

    /// Starvation score: `(ms since serviced + 1) * len * weight`.
    pub fn score(&self, level: Priority, now: Instant, weights: &PerLevel<f64>) -> f64 {
        let waited_ms = self.since_serviced(level, now).as_secs_f64() * 1000.0;
        (waited_ms + 1.0) * self.len(level) as f64 * weights.get(level)
    }

    /// Pick the level to service. Critical is taken whenever it has work;
    /// otherwise the highest starvation score wins, ties going to the higher level.
    pub fn select(&self, now: Instant, weights: &PerLevel<f64>) -> Option<Priority> {
        if self.len(Priority::Critical) > 0 {
            return Some(Priority::Critical);
        }
        let mut best: Option<(Priority, f64)> = None;
        for level in Priority::ALL.into_iter().skip(1) {
            if self.len(level) == 0 {
                continue;
            }
            let score = self.score(level, now, weights);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((level, score)),
            }
        }
        best.map(|(level, _)| level)
    }

    /// Any non-empty queue strictly above `level`, excluding background.
    pub fn has_work_above(&self, level: Priority) -> bool {
        Priority::ALL
            .into_iter()
            .filter(|p| *p < level && *p != Priority::Background)
            .any(|p| self.len(p) > 0)
    }
}
