use std::sync::Arc;
use std::time::{Duration, Instant};

use rota_core::StreamError;
use serde_json::Value;
use tokio::sync::oneshot;

use super::types::{
    CombinedResult, ItemResult, ProgressCallback, StreamSnapshot, StreamStatus,
};
use super::worker::BatchWorker;

/// One bulk job, processed as an ordered sequence of chunks.
pub(crate) struct StreamJob {
    pub stream_id: String,
    pub items: Vec<Value>,
    pub total: usize,
    /// Items committed so far; always a prefix of `items`.
    pub processed: usize,
    pub chunk_size: usize,
    pub status: StreamStatus,
    pub results: Vec<ItemResult>,
    pub worker: Arc<dyn BatchWorker>,
    pub on_progress: Option<ProgressCallback>,
    pub started_at: Instant,
    pub last_progress: Instant,
    /// Chunks offered since `last_progress` that committed nothing.
    pub unproductive_offers: u32,
    pub finished_at: Option<Instant>,
    pub chunks: usize,
    pub completion: Option<oneshot::Sender<Result<CombinedResult, StreamError>>>,
}

impl StreamJob {
    pub fn remaining(&self) -> usize {
        self.total - self.processed
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            status: self.status,
            processed: self.processed,
            total: self.total,
            chunk_size: self.chunk_size,
            chunks: self.chunks,
        }
    }

    /// Mark finished and resolve the completion with `outcome`.
    pub fn finish(
        &mut self,
        status: StreamStatus,
        now: Instant,
        outcome: Result<CombinedResult, StreamError>,
    ) {
        self.status = status;
        self.finished_at = Some(now);
        // Inputs are no longer needed once the job is done.
        self.items = Vec::new();
        self.on_progress = None;
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Move the collected results into a combined result.
    pub fn combine(&mut self, now: Instant) -> CombinedResult {
        let mut results = std::mem::take(&mut self.results);
        results.sort_by_key(|r| r.index);
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        CombinedResult {
            stream_id: self.stream_id.clone(),
            failed: results.len() - succeeded,
            succeeded,
            results,
            chunks: self.chunks,
            final_chunk_size: self.chunk_size,
            duration: now.saturating_duration_since(self.started_at),
        }
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    /// Stalled only when the worker was given a chance and still made no
    /// progress; waiting for a turn in the round-robin does not count.
    pub fn is_stalled(&self, now: Instant, threshold: Duration) -> bool {
        self.unproductive_offers > 0 && self.idle(now) > threshold
    }
}
