//! Memory pressure coordination.
//!
//! Usage samples feed a rolling average that maps onto a [`PressureLevel`](rota_core::PressureLevel).
//! Each level selects a cleanup policy; escalation to high or critical runs
//! a cleanup pass at once and is forwarded by the runtime as backpressure.

mod coordinator;
pub mod registry;
mod usage;

pub use coordinator::{CleanupReport, Collector, MemoryCoordinator, PressureChange};
pub use registry::{DisposeFn, ResourceHandle, ResourceInfo, ResourceRegistry};
pub use usage::RollingUsage;
