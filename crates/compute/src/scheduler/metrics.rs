use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rota_core::{Priority, PressureLevel};
use serde::Serialize;

/// Scheduler operational metrics exposed to the host.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks completed per priority level.
    pub tasks_completed: HashMap<Priority, u64>,
    /// Number of tasks pending per priority level.
    pub tasks_pending: HashMap<Priority, usize>,
    /// Average task duration (first dispatch to completion) per level.
    pub avg_task_duration: HashMap<Priority, Duration>,
    pub interruptions: u64,
    pub retries: u64,
    /// Tasks dropped after exhausting their retries.
    pub failures: u64,
    pub cancellations: u64,
    pub ticks: u64,
    /// Last completion time.
    pub last_completed: Option<DateTime<Utc>>,
    /// Memory pressure currently applied to the queues.
    pub current_pressure: PressureLevel,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            tasks_completed: HashMap::new(),
            tasks_pending: HashMap::new(),
            avg_task_duration: HashMap::new(),
            interruptions: 0,
            retries: 0,
            failures: 0,
            cancellations: 0,
            ticks: 0,
            last_completed: None,
            current_pressure: PressureLevel::Normal,
        }
    }
}

impl SchedulerMetrics {
    /// Record a completed task.
    pub fn record_completion(&mut self, priority: Priority, duration: Duration) {
        let count = {
            let c = self.tasks_completed.entry(priority).or_default();
            *c += 1;
            *c
        };
        self.last_completed = Some(Utc::now());

        let prev_avg = self
            .avg_task_duration
            .get(&priority)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(priority, new_avg);
    }

    pub fn total_completed(&self) -> u64 {
        self.tasks_completed.values().sum()
    }
}
