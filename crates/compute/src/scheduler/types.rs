use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rota_core::{ConfigurationError, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::TaskProcessor;

/// Caller-chosen task identifier. Unique among live tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Descriptive metadata carried alongside a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Whether the scheduler may preempt this task between slices.
    pub interruptible: bool,
    /// UI element the task is computing for (e.g. a roster cell).
    pub related_element_key: Option<String>,
    /// Host event that caused the submission.
    pub trigger_event: Option<String>,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            interruptible: true,
            related_element_key: None,
            trigger_event: None,
        }
    }
}

/// A task submission. Validated by `queue_task`; never enters a queue if malformed.
pub struct TaskSpec {
    pub id: TaskId,
    /// Explicit priority; wins over every other hint.
    pub priority: Option<Priority>,
    /// Task kind, looked up in the configured kind -> priority table.
    pub kind: Option<String>,
    pub urgent: bool,
    pub background: bool,
    pub payload: Value,
    pub processor: Option<Box<dyn TaskProcessor>>,
    pub metadata: TaskMetadata,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, processor: impl TaskProcessor + 'static) -> Self {
        Self {
            id: id.into(),
            processor: Some(Box::new(processor)),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn non_interruptible(mut self) -> Self {
        self.metadata.interruptible = false;
        self
    }

    /// Structural checks that need no scheduler state.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.is_empty() {
            return Err(ConfigurationError::MissingTaskId);
        }
        if self.processor.is_none() {
            return Err(ConfigurationError::MissingProcessor(self.id.to_string()));
        }
        Ok(())
    }
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            id: TaskId::new(""),
            priority: None,
            kind: None,
            urgent: false,
            background: false,
            payload: Value::Null,
            processor: None,
            metadata: TaskMetadata::default(),
        }
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("urgent", &self.urgent)
            .field("background", &self.background)
            .field("has_processor", &self.processor.is_some())
            .finish()
    }
}

/// Returned by a successful `queue_task`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueReceipt {
    pub task_id: TaskId,
    pub priority: Priority,
    /// Zero-based position within the priority's queue.
    pub queue_position: usize,
}

/// Result of running one slice of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceOutcome {
    /// The task finished with this result.
    Complete(Value),
    /// More slices are needed; the scheduler may preempt here.
    Pending,
}

/// Cooperative cancellation signal polled by task bodies.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Events published by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskQueued {
        task_id: TaskId,
        priority: Priority,
        queue_position: usize,
    },
    TaskStarted {
        task_id: TaskId,
        priority: Priority,
        /// True when a previously interrupted or yielded task continues.
        resumed: bool,
    },
    TaskCompleted {
        task_id: TaskId,
        priority: Priority,
        duration: Duration,
        result: Value,
    },
    TaskInterrupted {
        task_id: TaskId,
        priority: Priority,
        interruption_count: u32,
    },
    TaskRetried {
        task_id: TaskId,
        from: Priority,
        to: Priority,
        failure_count: u32,
        message: String,
    },
    TaskError {
        task_id: TaskId,
        priority: Priority,
        message: String,
        retries: u32,
    },
    TaskCancelled {
        task_id: TaskId,
        in_flight: bool,
    },
}

impl SchedulerEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            SchedulerEvent::TaskQueued { task_id, .. }
            | SchedulerEvent::TaskStarted { task_id, .. }
            | SchedulerEvent::TaskCompleted { task_id, .. }
            | SchedulerEvent::TaskInterrupted { task_id, .. }
            | SchedulerEvent::TaskRetried { task_id, .. }
            | SchedulerEvent::TaskError { task_id, .. }
            | SchedulerEvent::TaskCancelled { task_id, .. } => task_id,
        }
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// History entry kept after a task leaves live tracking.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub priority: Priority,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    pub interruptions: u32,
    pub failure_count: u32,
    pub finished_at: DateTime<Utc>,
}

/// Summary of one scheduling tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Level selected this tick, `None` when every queue was empty.
    pub level: Option<Priority>,
    pub budget: Duration,
    pub elapsed: Duration,
    pub dispatched: usize,
    pub completed: usize,
    /// An in-flight task was preempted and requeued.
    pub interrupted: bool,
    /// The tick stopped early because higher-priority work arrived.
    pub preempted: bool,
}

/// Message from outside the loop, applied at the next suspension point.
#[derive(Debug)]
pub(crate) enum SchedulerMessage {
    Submit(TaskSpec),
    Cancel(TaskId),
}

/// Error from submitting through a [`super::SchedulerHandle`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rejected(#[from] ConfigurationError),
    #[error("scheduler loop is no longer running")]
    Closed,
}
