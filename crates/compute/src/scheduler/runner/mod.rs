//! Priority scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: PriorityScheduler struct, constructor, events, and accessors
//! - `scheduling`: submission, priority resolution, cancellation, the inbox
//! - `execution`: the tick loop, slicing, preemption, and retries

mod core;
mod execution;
mod scheduling;

pub use self::core::{ExecutionContext, PriorityScheduler, TickContext};
pub use self::scheduling::SchedulerHandle;
