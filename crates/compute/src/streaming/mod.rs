//! Chunked streaming execution of bulk jobs.
//!
//! A job is split into chunks that run one at a time on the loop timeline.
//! Chunk size adapts to measured latency, results are buffered and flushed
//! to subscribers, and a stream without progress is marked stalled.

mod delivery;
mod executor;
mod job;
pub mod sizing;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;

pub use delivery::{DeliveryCallback, ResultBuffer};
pub use executor::StreamingExecutor;
pub use sizing::ChunkSizer;
pub use types::{
    CombinedResult, ItemResult, ProgressCallback, PumpReport, ResizeReason, StreamCompletion,
    StreamDelivery, StreamErrorKind, StreamEvent, StreamOptions, StreamProgress, StreamSnapshot,
    StreamStatus, SubscribeOptions,
};
pub use worker::{BatchWorker, ItemFn, PoolWorker};
