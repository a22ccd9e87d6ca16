use std::time::Duration;

use thiserror::Error;

/// A task, stream job, or config that is malformed.
///
/// This is the only error that reaches callers synchronously: anything that
/// fails validation is rejected before it enters a queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("task is missing an id")]
    MissingTaskId,

    #[error("task '{0}' has no processor")]
    MissingProcessor(String),

    #[error("task '{0}' is already queued or running")]
    DuplicateTask(String),

    #[error("stream is missing an id")]
    MissingStreamId,

    #[error("stream '{0}' is already active")]
    DuplicateStream(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Error returned by a task body for one slice of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskProcessorError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task observed cancellation")]
    Cancelled,
}

/// Failure of a single stream item. Recorded inline, never fatal to the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamItemError {
    #[error("item failed: {0}")]
    Failed(String),
}

/// A stream made no progress for longer than the stall threshold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stream '{stream_id}' made no progress for {idle:?}")]
pub struct StallError {
    pub stream_id: String,
    pub idle: Duration,
}

/// Explicit cancellation of a queued or in-flight task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancellationError {
    #[error("task '{0}' was cancelled while queued")]
    Queued(String),

    #[error("task '{0}' was cancelled while running")]
    InFlight(String),
}

/// Terminal failure of a whole stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error(transparent)]
    Stalled(#[from] StallError),

    #[error("stream '{stream_id}' failed: {reason}")]
    Structural { stream_id: String, reason: String },

    #[error("executor dropped stream '{0}' before it finished")]
    Abandoned(String),
}

/// Umbrella error for loading and wiring the runtime.
#[derive(Error, Debug)]
pub enum RotaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
