//! Cooperative priority scheduler with preemption and backpressure.
//!
//! Tasks are queued at one of five [`Priority`](rota_core::Priority) levels.
//! Each tick selects a level (critical first, otherwise by starvation score)
//! and runs task slices until the level's time budget is spent. Between
//! slices the scheduler may preempt an interruptible task in favour of
//! higher-priority work.

pub mod metrics;
mod queues;
pub mod runner;
pub mod task;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use runner::{ExecutionContext, PriorityScheduler, SchedulerHandle, TickContext};
pub use task::{from_fn, once, FnProcessor, TaskContext, TaskProcessor};
pub use types::{
    CancellationFlag, QueueReceipt, SchedulerEvent, SliceOutcome, SubmitError, TaskId,
    TaskMetadata, TaskOutcome, TaskRecord, TaskSpec, TickReport,
};
