use std::time::{Duration, Instant};

use chrono::Utc;
use rota_core::{CancellationError, PerLevel, Priority, TaskProcessorError};
use tracing::{debug, info, warn};

use crate::adaptive::AdaptiveParameters;
use crate::scheduler::queues::QueuedTask;
use crate::scheduler::task::TaskContext;
use crate::scheduler::types::{
    SchedulerEvent, SliceOutcome, TaskOutcome, TaskRecord, TickReport,
};

use super::{PriorityScheduler, TickContext};

/// How one dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Completed,
    /// Preempted by higher-priority work and requeued at the front.
    Interrupted,
    /// Budget spent with work remaining; requeued at the front.
    Yielded,
    Retried,
    Dropped,
    Cancelled,
}

impl PriorityScheduler {
    /// Starvation weights after memory backpressure on low and background work.
    pub fn effective_weights(&self, params: &AdaptiveParameters) -> PerLevel<f64> {
        let factor = self.config.pressure_factor(self.pressure);
        params.priority_weights.map(|level, w| match level {
            Priority::Low | Priority::Background => w * factor,
            _ => w,
        })
    }

    /// Time budget for servicing `level` this tick.
    pub fn tick_budget(
        &self,
        level: Priority,
        params: &AdaptiveParameters,
        user_active: bool,
    ) -> Duration {
        let mut factor = 1.0;
        if user_active {
            factor *= self.config.user_active_slice_factor;
        }
        if matches!(level, Priority::Low | Priority::Background) {
            factor *= self.config.pressure_factor(self.pressure);
        }
        params
            .time_slice_per_level
            .get(level)
            .mul_f64(factor)
            .max(Duration::from_millis(1))
    }

    /// Whether work at `level` should give way: critical work is waiting, or
    /// the user is active while background runs and foreground work is queued.
    pub fn should_interrupt_processing(&self, level: Priority, user_active: bool) -> bool {
        if level != Priority::Critical && self.queues.len(Priority::Critical) > 0 {
            return true;
        }
        level == Priority::Background
            && user_active
            && self.queues.has_work_above(Priority::Background)
    }

    /// Run one scheduling tick: pick a level, then dispatch its tasks until the
    /// budget is spent, the dispatch limit is hit, or higher work preempts.
    pub async fn tick(&mut self, ctx: &TickContext<'_>) -> TickReport {
        self.drain_inbox();
        self.metrics.ticks += 1;

        let user_active = ctx.telemetry.user_active;
        let tick_start = self.clock.now();
        let weights = self.effective_weights(ctx.params);
        let mut report = TickReport::default();

        let Some(level) = self.queues.select(tick_start, &weights) else {
            return report;
        };
        let budget = self.tick_budget(level, ctx.params, user_active);
        self.queues.mark_serviced(level, tick_start);
        report.level = Some(level);
        report.budget = budget;

        while report.dispatched < self.config.max_concurrent_tasks {
            if report.dispatched > 0 {
                tokio::task::yield_now().await;
                self.drain_inbox();
            }
            if self.should_interrupt_processing(level, user_active) {
                report.preempted = true;
                break;
            }
            if self.elapsed_since(tick_start) >= budget {
                break;
            }
            let Some(task) = self.queues.pop_front(level) else {
                break;
            };
            report.dispatched += 1;

            match self.run_task(task, level, tick_start, budget, user_active).await {
                Dispatch::Completed => report.completed += 1,
                Dispatch::Interrupted => {
                    report.interrupted = true;
                    report.preempted = true;
                    break;
                }
                Dispatch::Yielded => break,
                Dispatch::Retried | Dispatch::Dropped | Dispatch::Cancelled => {}
            }
        }

        self.execution.clear();
        report.elapsed = self.elapsed_since(tick_start);
        debug!(
            level = ?report.level,
            dispatched = report.dispatched,
            completed = report.completed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Tick finished"
        );
        report
    }

    fn elapsed_since(&self, start: Instant) -> Duration {
        self.clock.now().saturating_duration_since(start)
    }

    /// Drive one task slice by slice. The task is consumed or requeued.
    async fn run_task(
        &mut self,
        mut task: QueuedTask,
        level: Priority,
        tick_start: Instant,
        budget: Duration,
        user_active: bool,
    ) -> Dispatch {
        let now = self.clock.now();
        let resumed = task.started_at.is_some();
        if !resumed {
            task.started_at = Some(now);
        }

        self.execution.current_task = Some(task.id.clone());
        self.execution.current_priority = Some(task.priority);
        self.execution.cancellation = Some(task.cancellation.clone());

        debug!(task_id = %task.id, priority = %task.priority, resumed, "Task started");
        self.emit(SchedulerEvent::TaskStarted {
            task_id: task.id.clone(),
            priority: task.priority,
            resumed,
        });

        loop {
            let slice_start = self.clock.now();
            self.execution.slice_start = Some(slice_start);
            let ctx = TaskContext {
                task_id: task.id.clone(),
                payload: task.payload.clone(),
                priority: task.priority,
                slice: budget.saturating_sub(slice_start.saturating_duration_since(tick_start)),
                failure_count: task.failure_count,
                cancellation: task.cancellation.clone(),
            };

            match task.processor.run_slice(&ctx).await {
                Ok(SliceOutcome::Complete(result)) => {
                    self.complete(task, result);
                    return Dispatch::Completed;
                }
                Ok(SliceOutcome::Pending) => {}
                Err(TaskProcessorError::Cancelled) => {
                    self.cancelled_in_flight(task);
                    return Dispatch::Cancelled;
                }
                Err(TaskProcessorError::Failed(message)) => {
                    return self.fail(task, message);
                }
            }

            // Suspension point between slices.
            tokio::task::yield_now().await;
            self.drain_inbox();

            if task.cancellation.is_cancelled() {
                self.cancelled_in_flight(task);
                return Dispatch::Cancelled;
            }
            if task.metadata.interruptible && self.should_interrupt_processing(level, user_active) {
                task.interruptions += 1;
                self.execution.interruption_count += 1;
                self.metrics.interruptions += 1;
                info!(
                    task_id = %task.id,
                    priority = %task.priority,
                    interruptions = task.interruptions,
                    "Task interrupted"
                );
                self.emit(SchedulerEvent::TaskInterrupted {
                    task_id: task.id.clone(),
                    priority: task.priority,
                    interruption_count: task.interruptions,
                });
                self.queues.push_front(task);
                self.execution.clear();
                return Dispatch::Interrupted;
            }
            if self.elapsed_since(tick_start) >= budget {
                debug!(task_id = %task.id, "Budget spent, task yields");
                self.queues.push_front(task);
                self.execution.clear();
                return Dispatch::Yielded;
            }
        }
    }

    fn complete(&mut self, task: QueuedTask, result: serde_json::Value) {
        let duration = self.duration_of(&task);
        self.live.remove(&task.id);
        self.metrics.record_completion(task.priority, duration);
        info!(
            task_id = %task.id,
            priority = %task.priority,
            duration_ms = duration.as_millis() as u64,
            "Task completed"
        );
        self.emit(SchedulerEvent::TaskCompleted {
            task_id: task.id.clone(),
            priority: task.priority,
            duration,
            result,
        });
        self.finish(task, TaskOutcome::Completed, duration);
    }

    /// Retry one level lower, or drop once retries are exhausted.
    fn fail(&mut self, mut task: QueuedTask, message: String) -> Dispatch {
        if task.failure_count < self.config.max_retries {
            let from = task.priority;
            let to = from.demoted();
            task.failure_count += 1;
            task.priority = to;
            self.metrics.retries += 1;
            warn!(
                task_id = %task.id,
                %from,
                %to,
                failure_count = task.failure_count,
                error = %message,
                "Task failed, retrying at lower priority"
            );
            self.emit(SchedulerEvent::TaskRetried {
                task_id: task.id.clone(),
                from,
                to,
                failure_count: task.failure_count,
                message,
            });
            self.queues.push_back(task);
            self.execution.clear();
            return Dispatch::Retried;
        }

        let duration = self.duration_of(&task);
        self.live.remove(&task.id);
        self.metrics.failures += 1;
        warn!(
            task_id = %task.id,
            retries = task.failure_count,
            error = %message,
            "Task dropped after exhausting retries"
        );
        self.emit(SchedulerEvent::TaskError {
            task_id: task.id.clone(),
            priority: task.priority,
            message,
            retries: task.failure_count,
        });
        self.finish(task, TaskOutcome::Failed, duration);
        Dispatch::Dropped
    }

    fn cancelled_in_flight(&mut self, task: QueuedTask) {
        let duration = self.duration_of(&task);
        self.live.remove(&task.id);
        self.metrics.cancellations += 1;
        info!(task_id = %task.id, "{}", CancellationError::InFlight(task.id.to_string()));
        self.emit(SchedulerEvent::TaskCancelled {
            task_id: task.id.clone(),
            in_flight: true,
        });
        self.finish(task, TaskOutcome::Cancelled, duration);
    }

    fn finish(&mut self, task: QueuedTask, outcome: TaskOutcome, duration: Duration) {
        self.execution.clear();
        self.record(TaskRecord {
            task_id: task.id,
            priority: task.priority,
            outcome,
            duration,
            interruptions: task.interruptions,
            failure_count: task.failure_count,
            finished_at: Utc::now(),
        });
    }

    fn duration_of(&self, task: &QueuedTask) -> Duration {
        task.started_at
            .map(|s| self.elapsed_since(s))
            .unwrap_or_default()
    }
}
