pub mod adaptive;
pub mod memory;
pub mod runtime;
pub mod scheduler;
pub mod streaming;

pub use adaptive::{AdaptiveController, AdaptiveParameters, ControllerEvent};
pub use memory::{CleanupReport, Collector, MemoryCoordinator, PressureChange, ResourceHandle};
pub use runtime::{Runtime, StepReport};
pub use scheduler::{
    PriorityScheduler, QueueReceipt, SchedulerEvent, SchedulerHandle, SchedulerMetrics,
    TaskProcessor, TaskSpec, TickContext, TickReport,
};
pub use streaming::{
    BatchWorker, CombinedResult, PoolWorker, StreamCompletion, StreamEvent, StreamingExecutor,
};
