use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use rota_core::config::StreamingConfig;
use rota_core::{
    ConfigurationError, EventBus, PressureLevel, SharedClock, StallError, StreamError,
    SubscriptionId, TelemetrySample,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::adaptive::AdaptiveParameters;

use super::delivery::{ResultBuffer, Subscriptions};
use super::job::StreamJob;
use super::sizing::ChunkSizer;
use super::types::{
    ItemResult, ProgressCallback, PumpReport, ResizeReason, StreamCompletion, StreamDelivery,
    StreamErrorKind, StreamEvent, StreamOptions, StreamProgress, StreamSnapshot, StreamStatus,
    SubscribeOptions,
};
use super::worker::BatchWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStep {
    Committed,
    Finished,
    TimedOut,
    Failed,
}

/// Runs bulk jobs chunk by chunk on the loop timeline.
pub struct StreamingExecutor {
    config: StreamingConfig,
    clock: SharedClock,
    sizer: ChunkSizer,
    jobs: Vec<StreamJob>,
    /// Round-robin position over `jobs`.
    cursor: usize,
    /// Chunk size for new streams, tracked from the adaptive parameters.
    base_chunk_size: usize,
    buffer: ResultBuffer,
    subscriptions: Subscriptions,
    events: EventBus<StreamEvent>,
    pressure: PressureLevel,
}

impl StreamingExecutor {
    pub fn new(config: StreamingConfig, clock: SharedClock) -> Self {
        let sizer = ChunkSizer::from_config(&config);
        let base_chunk_size = sizer.clamp(AdaptiveParameters::default().chunk_size);
        info!(
            target_latency_ms = config.target_latency_ms,
            min_chunk = config.min_chunk_size,
            max_chunk = config.max_chunk_size,
            "Streaming executor created"
        );
        Self {
            buffer: ResultBuffer::new(config.buffer_size, config.flush_interval()),
            sizer,
            jobs: Vec::new(),
            cursor: 0,
            base_chunk_size,
            subscriptions: Subscriptions::new(),
            events: EventBus::new("streaming"),
            pressure: PressureLevel::Normal,
            clock,
            config,
        }
    }

    /// Register a job. Malformed jobs are rejected before anything runs.
    pub fn start_stream(
        &mut self,
        stream_id: impl Into<String>,
        items: Vec<Value>,
        worker: Arc<dyn BatchWorker>,
        on_progress: Option<ProgressCallback>,
        options: StreamOptions,
    ) -> Result<StreamCompletion, ConfigurationError> {
        let stream_id = stream_id.into();
        if stream_id.trim().is_empty() {
            return Err(ConfigurationError::MissingStreamId);
        }
        if self
            .jobs
            .iter()
            .any(|j| j.stream_id == stream_id && j.status == StreamStatus::Active)
        {
            return Err(ConfigurationError::DuplicateStream(stream_id));
        }
        // A retained, finished job under the same id is replaced.
        self.jobs.retain(|j| j.stream_id != stream_id);
        self.subscriptions.reopen_stream(&stream_id);

        let now = self.clock.now();
        let chunk_size = self
            .sizer
            .clamp(options.chunk_size.unwrap_or(self.base_chunk_size));
        let total = items.len();
        let (tx, rx) = oneshot::channel();

        let mut job = StreamJob {
            stream_id: stream_id.clone(),
            items,
            total,
            processed: 0,
            chunk_size,
            status: StreamStatus::Active,
            results: Vec::with_capacity(total),
            worker,
            on_progress,
            started_at: now,
            last_progress: now,
            unproductive_offers: 0,
            finished_at: None,
            chunks: 0,
            completion: Some(tx),
        };

        info!(stream_id = %stream_id, total, chunk_size, "Stream started");
        self.events.publish(&StreamEvent::Started {
            stream_id: stream_id.clone(),
            total,
            chunk_size,
        });

        let empty = total == 0;
        if empty {
            let combined = job.combine(now);
            job.finish(StreamStatus::Completed, now, Ok(combined));
            self.events.publish(&StreamEvent::Completed {
                stream_id: stream_id.clone(),
                succeeded: 0,
                failed: 0,
                duration: std::time::Duration::ZERO,
            });
        }
        self.jobs.push(job);
        if empty {
            self.close_subscriptions(&stream_id, now);
        }
        Ok(StreamCompletion::new(stream_id, rx))
    }

    /// Advance active streams chunk by chunk until a yield point, then flush.
    pub async fn pump(
        &mut self,
        params: &AdaptiveParameters,
        telemetry: &TelemetrySample,
    ) -> PumpReport {
        let start = self.clock.now();
        let mut report = PumpReport::default();
        self.base_chunk_size = self.sizer.clamp(params.chunk_size);

        let constrained = params.emergency || self.pressure.is_backpressure();
        self.buffer.set_capacity(if constrained {
            self.config.min_buffer_size
        } else {
            self.config.buffer_size
        });

        self.check_stalls(start, &mut report);

        let headroom = telemetry.is_good();
        while let Some(idx) = self.next_active() {
            let step = self.run_chunk(idx, constrained, headroom, &mut report).await;

            // Yield point between chunks.
            let now = self.clock.now();
            if self.buffer.should_flush(now) {
                report.flushed += self.flush();
            }
            if step == ChunkStep::TimedOut
                || params.emergency
                || now.saturating_duration_since(start) >= params.yield_interval
            {
                report.yielded = self.active_streams() > 0;
                break;
            }
        }

        report.flushed += self.flush();
        tokio::task::yield_now().await;
        report
    }

    async fn run_chunk(
        &mut self,
        idx: usize,
        constrained: bool,
        headroom: bool,
        report: &mut PumpReport,
    ) -> ChunkStep {
        let min = self.sizer.min();
        let (stream_id, worker, start, end) = {
            let job = &mut self.jobs[idx];
            if constrained && job.chunk_size != min {
                let from = job.chunk_size;
                job.chunk_size = min;
                debug!(stream_id = %job.stream_id, from, to = min, "Chunk size forced to minimum");
                self.events.publish(&StreamEvent::ChunkResized {
                    stream_id: job.stream_id.clone(),
                    from,
                    to: min,
                    reason: ResizeReason::Backpressure,
                });
            }
            let start = job.processed;
            let end = (start + job.chunk_size).min(job.total);
            (job.stream_id.clone(), Arc::clone(&job.worker), start, end)
        };

        let t0 = self.clock.now();
        let outcome = {
            let batch = &self.jobs[idx].items[start..end];
            tokio::time::timeout(self.config.worker_timeout(), worker.process_batch(batch)).await
        };
        let now = self.clock.now();
        let latency = now.saturating_duration_since(t0);

        let results = match outcome {
            Err(_) => {
                report.timeouts += 1;
                let job = &mut self.jobs[idx];
                job.unproductive_offers += 1;
                let from = job.chunk_size;
                let to = self.sizer.shrink(from);
                job.chunk_size = to;
                warn!(
                    stream_id = %stream_id,
                    timeout_ms = self.config.worker_timeout_ms,
                    from,
                    to,
                    "Worker timed out, chunk left uncommitted"
                );
                if from != to {
                    self.events.publish(&StreamEvent::ChunkResized {
                        stream_id,
                        from,
                        to,
                        reason: ResizeReason::Timeout,
                    });
                }
                return ChunkStep::TimedOut;
            }
            Ok(results) if results.len() != end - start => {
                let reason = format!(
                    "worker returned {} results for {} items",
                    results.len(),
                    end - start
                );
                error!(stream_id = %stream_id, %reason, "Stream failed");
                report.failed += 1;
                self.jobs[idx].finish(
                    StreamStatus::Failed,
                    now,
                    Err(StreamError::Structural {
                        stream_id: stream_id.clone(),
                        reason: reason.clone(),
                    }),
                );
                report.flushed += self.close_subscriptions(&stream_id, now);
                self.events.publish(&StreamEvent::Error {
                    stream_id,
                    kind: StreamErrorKind::Structural,
                    message: reason,
                });
                return ChunkStep::Failed;
            }
            Ok(results) => results,
        };

        report.chunks += 1;
        report.items += results.len();
        for (offset, result) in results.into_iter().enumerate() {
            let item = ItemResult {
                index: start + offset,
                result,
            };
            self.buffer.push(&stream_id, item.clone(), now);
            self.jobs[idx].results.push(item);
            if self.buffer.is_full() {
                report.flushed += self.flush();
            }
        }

        let job = &mut self.jobs[idx];
        job.processed = end;
        job.chunks += 1;
        job.last_progress = now;
        job.unproductive_offers = 0;

        let progress = StreamProgress {
            processed: end,
            total: job.total,
            chunk_size: job.chunk_size,
        };
        if let Some(callback) = job.on_progress.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| callback(&progress))).is_err() {
                error!(stream_id = %stream_id, "progress callback panicked");
            }
        }
        self.events.publish(&StreamEvent::Progress {
            stream_id: stream_id.clone(),
            processed: end,
            total: job.total,
        });

        if !constrained {
            let from = job.chunk_size;
            let to = self.sizer.next(from, latency, headroom);
            if to != from {
                job.chunk_size = to;
                debug!(
                    stream_id = %stream_id,
                    from,
                    to,
                    latency_ms = latency.as_millis() as u64,
                    "Chunk size adjusted"
                );
                self.events.publish(&StreamEvent::ChunkResized {
                    stream_id: stream_id.clone(),
                    from,
                    to,
                    reason: ResizeReason::Latency,
                });
            }
        }

        if job.remaining() == 0 {
            report.flushed += self.complete(idx, now);
            report.completed += 1;
            ChunkStep::Finished
        } else {
            ChunkStep::Committed
        }
    }

    /// Finish a fully processed job. Returns results delivered to subscribers.
    fn complete(&mut self, idx: usize, now: Instant) -> usize {
        let job = &mut self.jobs[idx];
        let combined = job.combine(now);
        let (succeeded, failed, duration) =
            (combined.succeeded, combined.failed, combined.duration);
        info!(
            stream_id = %job.stream_id,
            succeeded,
            failed,
            chunks = job.chunks,
            duration_ms = duration.as_millis() as u64,
            "Stream completed"
        );
        job.finish(StreamStatus::Completed, now, Ok(combined));
        let stream_id = job.stream_id.clone();
        self.events.publish(&StreamEvent::Completed {
            stream_id: stream_id.clone(),
            succeeded,
            failed,
            duration,
        });
        self.close_subscriptions(&stream_id, now)
    }

    /// Send the finishing delivery for a stream that just ended. When some of
    /// its results are still buffered, the flush that carries them closes the
    /// subscriptions instead.
    fn close_subscriptions(&mut self, stream_id: &str, now: Instant) -> usize {
        if self.buffer.holds(stream_id) {
            return 0;
        }
        self.subscriptions.finish_stream(stream_id, now)
    }

    /// Mark streams whose worker keeps failing to progress as stalled.
    fn check_stalls(&mut self, now: Instant, report: &mut PumpReport) {
        let threshold = self.config.stall_threshold();
        let mut stalled = Vec::new();
        for job in &mut self.jobs {
            if job.status != StreamStatus::Active || !job.is_stalled(now, threshold) {
                continue;
            }
            let err = StallError {
                stream_id: job.stream_id.clone(),
                idle: job.idle(now),
            };
            warn!(
                stream_id = %job.stream_id,
                processed = job.processed,
                offers = job.unproductive_offers,
                "{}",
                err
            );
            let message = err.to_string();
            job.finish(StreamStatus::Stalled, now, Err(StreamError::Stalled(err)));
            self.events.publish(&StreamEvent::Error {
                stream_id: job.stream_id.clone(),
                kind: StreamErrorKind::Stall,
                message,
            });
            stalled.push(job.stream_id.clone());
            report.stalled += 1;
        }
        for stream_id in &stalled {
            report.flushed += self.close_subscriptions(stream_id, now);
        }
    }

    fn next_active(&mut self) -> Option<usize> {
        let n = self.jobs.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            if self.jobs[idx].status == StreamStatus::Active {
                self.cursor = idx + 1;
                return Some(idx);
            }
        }
        None
    }

    /// Deliver buffered results to subscribers. Returns how many were delivered.
    /// An empty buffer makes this a no-op.
    pub fn flush(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }
        let now = self.clock.now();
        let grouped = self.buffer.drain_grouped();
        let finished: HashSet<String> = self
            .jobs
            .iter()
            .filter(|j| j.status.is_finished())
            .map(|j| j.stream_id.clone())
            .collect();
        self.subscriptions.deliver(&grouped, &finished, now)
    }

    /// Drop finished streams older than the retention window.
    pub fn prune_finished(&mut self, now: Instant) -> usize {
        let retention = self.config.retention();
        let mut pruned = Vec::new();
        self.jobs.retain(|j| match j.finished_at {
            Some(at) if now.saturating_duration_since(at) >= retention => {
                pruned.push(j.stream_id.clone());
                false
            }
            _ => true,
        });
        for stream_id in &pruned {
            self.subscriptions.remove_stream(stream_id);
            debug!(stream_id = %stream_id, "Pruned finished stream");
        }
        pruned.len()
    }

    /// Memory pressure at high or critical forces minimum chunk and buffer sizes.
    pub fn apply_backpressure(&mut self, level: PressureLevel) {
        if self.pressure != level {
            info!(from = ?self.pressure, to = ?level, "Executor backpressure changed");
        }
        self.pressure = level;
    }

    pub fn subscribe(
        &mut self,
        stream_id: &str,
        callback: impl Fn(&StreamDelivery) + Send + Sync + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.subscriptions
            .add(stream_id, Box::new(callback), options)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(id)
    }

    pub fn subscribe_events(
        &mut self,
        callback: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe_events(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn stream_status(&self, stream_id: &str) -> Option<StreamStatus> {
        self.job(stream_id).map(|j| j.status)
    }

    pub fn snapshot(&self, stream_id: &str) -> Option<StreamSnapshot> {
        self.job(stream_id).map(StreamJob::snapshot)
    }

    pub fn active_streams(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == StreamStatus::Active)
            .count()
    }

    /// Streams held, active or retained.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn pressure(&self) -> PressureLevel {
        self.pressure
    }

    fn job(&self, stream_id: &str) -> Option<&StreamJob> {
        self.jobs.iter().find(|j| j.stream_id == stream_id)
    }
}

impl std::fmt::Debug for StreamingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingExecutor")
            .field("streams", &self.jobs.len())
            .field("active", &self.active_streams())
            .field("buffered", &self.buffer.len())
            .field("pressure", &self.pressure)
            .finish()
    }
}
