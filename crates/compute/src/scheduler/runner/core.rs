use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use rota_core::config::SchedulerConfig;
use rota_core::{EventBus, Priority, PressureLevel, SharedClock, SubscriptionId, TelemetrySample};
use tokio::sync::mpsc;
use tracing::info;

use crate::adaptive::AdaptiveParameters;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::queues::PriorityQueues;
use crate::scheduler::types::{
    CancellationFlag, SchedulerEvent, SchedulerMessage, TaskId, TaskRecord,
};

/// Inputs for one tick, captured once by the caller.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub params: &'a AdaptiveParameters,
    pub telemetry: &'a TelemetrySample,
}

/// What the scheduler is running right now.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub current_task: Option<TaskId>,
    pub current_priority: Option<Priority>,
    pub slice_start: Option<Instant>,
    /// Interruptions since the scheduler was created.
    pub interruption_count: u32,
    pub(crate) cancellation: Option<CancellationFlag>,
}

impl ExecutionContext {
    pub(super) fn clear(&mut self) {
        self.current_task = None;
        self.current_priority = None;
        self.slice_start = None;
        self.cancellation = None;
    }
}

/// Cooperative five-level scheduler driven by [`PriorityScheduler::tick`].
pub struct PriorityScheduler {
    pub(super) config: SchedulerConfig,
    pub(super) clock: SharedClock,
    pub(super) queues: PriorityQueues,
    /// Ids that are queued or in flight.
    pub(super) live: HashSet<TaskId>,
    pub(super) execution: ExecutionContext,
    pub(super) events: EventBus<SchedulerEvent>,
    pub(super) metrics: SchedulerMetrics,
    pub(super) history: VecDeque<TaskRecord>,
    pub(super) pressure: PressureLevel,
    pub(super) inbox_tx: mpsc::UnboundedSender<SchedulerMessage>,
    pub(super) inbox_rx: mpsc::UnboundedReceiver<SchedulerMessage>,
}

impl PriorityScheduler {
    pub fn new(config: SchedulerConfig, clock: SharedClock) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let now = clock.now();
        info!(
            max_concurrent = config.max_concurrent_tasks,
            max_retries = config.max_retries,
            "Priority scheduler created"
        );
        Self {
            config,
            clock,
            queues: PriorityQueues::new(now),
            live: HashSet::new(),
            execution: ExecutionContext::default(),
            events: EventBus::new("scheduler"),
            metrics: SchedulerMetrics::default(),
            history: VecDeque::new(),
            pressure: PressureLevel::Normal,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Register an event callback.
    pub fn subscribe(
        &mut self,
        callback: impl Fn(&SchedulerEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub(super) fn emit(&self, event: SchedulerEvent) {
        self.events.publish(&event);
    }

    pub(super) fn record(&mut self, record: TaskRecord) {
        if self.config.history_size == 0 {
            return;
        }
        while self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Snapshot of the metrics with current queue depths filled in.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut m = self.metrics.clone();
        for level in Priority::ALL {
            m.tasks_pending.insert(level, self.queues.len(level));
        }
        m
    }

    /// Terminal outcomes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TaskRecord> {
        self.history.iter()
    }

    pub fn pending(&self, level: Priority) -> usize {
        self.queues.len(level)
    }

    pub fn total_pending(&self) -> usize {
        self.queues.total()
    }

    /// Ids queued at `level`, head first.
    pub fn queued_ids(&self, level: Priority) -> Vec<TaskId> {
        self.queues.ids(level).cloned().collect()
    }

    pub fn is_live(&self, id: &TaskId) -> bool {
        self.live.contains(id)
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn pressure(&self) -> PressureLevel {
        self.pressure
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl std::fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("pending", &self.queues.total())
            .field("execution", &self.execution)
            .field("pressure", &self.pressure)
            .finish()
    }
}
