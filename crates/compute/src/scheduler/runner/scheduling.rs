use std::sync::Arc;

use chrono::Utc;
use rota_core::{CancellationError, ConfigurationError, Priority, PressureLevel};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::scheduler::queues::QueuedTask;
use crate::scheduler::types::{
    CancellationFlag, QueueReceipt, SchedulerEvent, SchedulerMessage, SubmitError, TaskId,
    TaskOutcome, TaskRecord, TaskSpec,
};

use super::PriorityScheduler;

/// Cloneable sender for code running outside the scheduling loop.
///
/// Submissions are validated here; duplicate ids are only detected when the
/// loop applies the message.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerMessage>,
}

impl SchedulerHandle {
    pub fn submit(&self, spec: TaskSpec) -> Result<(), SubmitError> {
        spec.validate()?;
        self.tx
            .send(SchedulerMessage::Submit(spec))
            .map_err(|_| SubmitError::Closed)
    }

    pub fn cancel(&self, id: impl Into<TaskId>) -> Result<(), SubmitError> {
        self.tx
            .send(SchedulerMessage::Cancel(id.into()))
            .map_err(|_| SubmitError::Closed)
    }
}

impl PriorityScheduler {
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.inbox_tx.clone(),
        }
    }

    /// Apply queued messages from handles. Returns how many were applied.
    pub fn drain_inbox(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.inbox_rx.try_recv() {
            applied += 1;
            match msg {
                SchedulerMessage::Submit(spec) => {
                    let id = spec.id.clone();
                    if let Err(e) = self.queue_task(spec) {
                        warn!(task_id = %id, error = %e, "Rejected task from handle");
                    }
                }
                SchedulerMessage::Cancel(id) => {
                    self.cancel_task(&id);
                }
            }
        }
        applied
    }

    /// Resolve a submission's level: explicit, then kind table, then flags.
    pub fn resolve_priority(&self, spec: &TaskSpec) -> Priority {
        if let Some(p) = spec.priority {
            return p;
        }
        if let Some(p) = spec
            .kind
            .as_deref()
            .and_then(|k| self.config.kind_priorities.get(k))
        {
            return *p;
        }
        if spec.urgent {
            Priority::High
        } else if spec.background {
            Priority::Background
        } else {
            Priority::Normal
        }
    }

    /// Validate and enqueue a task at the tail of its level.
    pub fn queue_task(&mut self, mut spec: TaskSpec) -> Result<QueueReceipt, ConfigurationError> {
        spec.validate()?;
        if self.live.contains(&spec.id) {
            return Err(ConfigurationError::DuplicateTask(spec.id.to_string()));
        }
        let priority = self.resolve_priority(&spec);
        let processor = spec
            .processor
            .take()
            .ok_or_else(|| ConfigurationError::MissingProcessor(spec.id.to_string()))?;

        let task = QueuedTask {
            id: spec.id.clone(),
            priority,
            payload: Arc::new(spec.payload),
            processor,
            metadata: spec.metadata,
            queued_at: self.clock.now(),
            started_at: None,
            failure_count: 0,
            interruptions: 0,
            cancellation: CancellationFlag::new(),
        };
        let queue_position = self.queues.push_back(task);
        self.live.insert(spec.id.clone());

        debug!(task_id = %spec.id, %priority, queue_position, "Task queued");
        self.emit(SchedulerEvent::TaskQueued {
            task_id: spec.id.clone(),
            priority,
            queue_position,
        });

        Ok(QueueReceipt {
            task_id: spec.id,
            priority,
            queue_position,
        })
    }

    /// Cancel a task. Queued tasks are removed at once; an in-flight task has
    /// its cancellation flag raised and stops at its next suspension point.
    pub fn cancel_task(&mut self, id: &TaskId) -> bool {
        if let Some(task) = self.queues.remove(id) {
            let reason = CancellationError::Queued(id.to_string());
            info!(task_id = %id, "{}", reason);
            self.live.remove(id);
            self.metrics.cancellations += 1;
            let now = self.clock.now();
            self.record(TaskRecord {
                task_id: task.id,
                priority: task.priority,
                outcome: TaskOutcome::Cancelled,
                duration: task
                    .started_at
                    .map(|s| now.saturating_duration_since(s))
                    .unwrap_or_default(),
                interruptions: task.interruptions,
                failure_count: task.failure_count,
                finished_at: Utc::now(),
            });
            self.emit(SchedulerEvent::TaskCancelled {
                task_id: id.clone(),
                in_flight: false,
            });
            return true;
        }

        if self.execution.current_task.as_ref() == Some(id) {
            if let Some(flag) = &self.execution.cancellation {
                debug!(task_id = %id, "Cancellation requested for running task");
                flag.cancel();
                return true;
            }
        }
        false
    }

    /// Set the memory pressure applied to low and background work.
    pub fn apply_backpressure(&mut self, level: PressureLevel) {
        if self.pressure != level {
            info!(from = ?self.pressure, to = ?level, "Scheduler backpressure changed");
        }
        self.pressure = level;
        self.metrics.current_pressure = level;
    }
}
