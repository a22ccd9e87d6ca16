use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rota_core::{StreamError, StreamItemError};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

/// Lifecycle of a stream job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Active,
    Completed,
    Failed,
    Stalled,
}

impl StreamStatus {
    pub fn is_finished(self) -> bool {
        self != StreamStatus::Active
    }
}

/// Outcome for one input item, tagged with its original index.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub index: usize,
    pub result: Result<Value, StreamItemError>,
}

impl ItemResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-stream options for `start_stream`.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Initial chunk size. Defaults to the current adaptive chunk size.
    pub chunk_size: Option<usize>,
}

/// Per-subscription delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Minimum gap between deliveries while the stream is active.
    pub throttle: Duration,
    /// Deliver results as they arrive. When false, one delivery is made
    /// after the stream finishes.
    pub include_partial: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::ZERO,
            include_partial: true,
        }
    }
}

/// Batch handed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDelivery {
    pub stream_id: String,
    pub results: Vec<ItemResult>,
    /// The stream has finished; no further deliveries follow.
    pub finished: bool,
}

/// Progress snapshot passed to the stream's `on_progress` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamProgress {
    pub processed: usize,
    pub total: usize,
    pub chunk_size: usize,
}

pub type ProgressCallback = Box<dyn FnMut(&StreamProgress) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    Stall,
    Structural,
}

/// Why a chunk size changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeReason {
    Latency,
    Timeout,
    Backpressure,
}

/// Events published by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Started {
        stream_id: String,
        total: usize,
        chunk_size: usize,
    },
    Progress {
        stream_id: String,
        processed: usize,
        total: usize,
    },
    ChunkResized {
        stream_id: String,
        from: usize,
        to: usize,
        reason: ResizeReason,
    },
    Completed {
        stream_id: String,
        succeeded: usize,
        failed: usize,
        duration: Duration,
    },
    Error {
        stream_id: String,
        kind: StreamErrorKind,
        message: String,
    },
}

/// Final result of a completed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedResult {
    pub stream_id: String,
    /// Exactly one entry per input item, ordered by index.
    pub results: Vec<ItemResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub final_chunk_size: usize,
    pub duration: Duration,
}

/// Status view of a live or retained stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamSnapshot {
    pub status: StreamStatus,
    pub processed: usize,
    pub total: usize,
    pub chunk_size: usize,
    pub chunks: usize,
}

/// Summary of one `pump` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    pub chunks: usize,
    pub items: usize,
    pub timeouts: usize,
    pub completed: usize,
    pub failed: usize,
    pub stalled: usize,
    /// Results handed to subscribers.
    pub flushed: usize,
    /// Stopped at a yield point with work remaining.
    pub yielded: bool,
}

/// Resolves once the stream finishes. The outcome is kept after it arrives,
/// so later reads return it again.
#[derive(Debug)]
pub struct StreamCompletion {
    stream_id: String,
    rx: oneshot::Receiver<Result<CombinedResult, StreamError>>,
    outcome: Option<Result<CombinedResult, StreamError>>,
}

impl StreamCompletion {
    pub(crate) fn new(
        stream_id: String,
        rx: oneshot::Receiver<Result<CombinedResult, StreamError>>,
    ) -> Self {
        Self {
            stream_id,
            rx,
            outcome: None,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Non-blocking check; `None` while the stream is still running.
    pub fn try_result(&mut self) -> Option<Result<CombinedResult, StreamError>> {
        if self.outcome.is_none() {
            let received = match self.rx.try_recv() {
                Ok(result) => result,
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    Err(StreamError::Abandoned(self.stream_id.clone()))
                }
            };
            self.outcome = Some(received);
        }
        self.outcome.clone()
    }
}

impl Future for StreamCompletion {
    type Output = Result<CombinedResult, StreamError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(outcome) = &this.outcome {
            return Poll::Ready(outcome.clone());
        }
        Pin::new(&mut this.rx).poll(cx).map(|r| {
            let outcome =
                r.unwrap_or_else(|_| Err(StreamError::Abandoned(this.stream_id.clone())));
            this.outcome = Some(outcome.clone());
            outcome
        })
    }
}
