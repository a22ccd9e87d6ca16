use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rota_core::config::{AdaptiveConfig, StreamingConfig};
use rota_core::{
    Clock, ConfigurationError, ManualClock, PressureLevel, ProcessingMode, StreamError,
    StreamItemError, TelemetrySample,
};
use serde_json::{json, Value};

use super::*;
use crate::adaptive::AdaptiveParameters;

/// Doubles each item; negative items fail. Advances the clock per batch.
struct ClockedWorker {
    clock: Arc<ManualClock>,
    per_batch: Duration,
}

#[async_trait]
impl BatchWorker for ClockedWorker {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>> {
        self.clock.advance(self.per_batch);
        items
            .iter()
            .map(|v| {
                let n = v.as_i64().unwrap_or_default();
                if n < 0 {
                    Err(StreamItemError::Failed(format!("negative {n}")))
                } else {
                    Ok(json!(n * 2))
                }
            })
            .collect()
    }
}

struct SlowWorker;

#[async_trait]
impl BatchWorker for SlowWorker {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        items.iter().map(|v| Ok(v.clone())).collect()
    }
}

/// Burns `per_batch` of clock time, then never answers in time.
struct StuckWorker {
    clock: Arc<ManualClock>,
    per_batch: Duration,
}

#[async_trait]
impl BatchWorker for StuckWorker {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>> {
        self.clock.advance(self.per_batch);
        tokio::time::sleep(Duration::from_secs(5)).await;
        items.iter().map(|v| Ok(v.clone())).collect()
    }
}

/// Drops the last result of every batch.
struct ShortWorker;

#[async_trait]
impl BatchWorker for ShortWorker {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>> {
        items.iter().skip(1).map(|v| Ok(v.clone())).collect()
    }
}

fn executor(config: StreamingConfig) -> (StreamingExecutor, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (StreamingExecutor::new(config, clock.clone()), clock)
}

fn worker(clock: &Arc<ManualClock>, per_batch_ms: u64) -> Arc<dyn BatchWorker> {
    Arc::new(ClockedWorker {
        clock: Arc::clone(clock),
        per_batch: Duration::from_millis(per_batch_ms),
    })
}

fn items(n: i64) -> Vec<Value> {
    (0..n).map(|i| json!(i)).collect()
}

fn chunked(size: usize) -> StreamOptions {
    StreamOptions {
        chunk_size: Some(size),
    }
}

fn record_events(exec: &mut StreamingExecutor) -> Arc<Mutex<Vec<StreamEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    exec.subscribe_events(move |e| sink.lock().unwrap().push(e.clone()));
    seen
}

async fn drain(exec: &mut StreamingExecutor, params: &AdaptiveParameters) -> usize {
    let sample = TelemetrySample::default();
    let mut pumps = 0;
    while exec.active_streams() > 0 && pumps < 100 {
        exec.pump(params, &sample).await;
        pumps += 1;
    }
    pumps
}

#[tokio::test]
async fn completes_with_one_result_per_item_in_order() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let mut done = exec
        .start_stream("s", items(25), worker(&clock, 0), None, chunked(10))
        .unwrap();

    drain(&mut exec, &AdaptiveParameters::default()).await;

    let combined = done.try_result().unwrap().unwrap();
    assert_eq!(combined.results.len(), 25);
    assert_eq!(combined.succeeded, 25);
    for (i, r) in combined.results.iter().enumerate() {
        assert_eq!(r.index, i);
        assert_eq!(r.result, Ok(json!(i as i64 * 2)));
    }
    assert_eq!(exec.stream_status("s"), Some(StreamStatus::Completed));
}

#[tokio::test]
async fn item_failures_are_recorded_inline() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let input = vec![json!(1), json!(-1), json!(2), json!(-2)];
    let done = exec
        .start_stream("s", input, worker(&clock, 0), None, StreamOptions::default())
        .unwrap();

    drain(&mut exec, &AdaptiveParameters::default()).await;

    let combined = done.await.unwrap();
    assert_eq!(combined.succeeded, 2);
    assert_eq!(combined.failed, 2);
    assert!(combined.results[1].result.is_err());
}

#[tokio::test]
async fn malformed_streams_are_rejected() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let w = worker(&clock, 0);

    let err = exec
        .start_stream("  ", items(3), Arc::clone(&w), None, StreamOptions::default())
        .unwrap_err();
    assert_eq!(err, ConfigurationError::MissingStreamId);

    exec.start_stream("a", items(3), Arc::clone(&w), None, StreamOptions::default())
        .unwrap();
    let err = exec
        .start_stream("a", items(3), Arc::clone(&w), None, StreamOptions::default())
        .unwrap_err();
    assert_eq!(err, ConfigurationError::DuplicateStream("a".into()));

    drain(&mut exec, &AdaptiveParameters::default()).await;
    assert!(exec
        .start_stream("a", items(3), w, None, StreamOptions::default())
        .is_ok());
}

#[tokio::test]
async fn empty_stream_completes_immediately() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let mut done = exec
        .start_stream("s", Vec::new(), worker(&clock, 0), None, StreamOptions::default())
        .unwrap();

    let combined = done.try_result().unwrap().unwrap();
    assert!(combined.results.is_empty());
    assert_eq!(exec.active_streams(), 0);
}

#[tokio::test]
async fn completion_can_be_read_more_than_once() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let mut done = exec
        .start_stream("s", items(3), worker(&clock, 0), None, StreamOptions::default())
        .unwrap();
    assert!(done.try_result().is_none());

    drain(&mut exec, &AdaptiveParameters::default()).await;

    let first = done.try_result().unwrap().unwrap();
    let second = done.try_result().unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(second.succeeded, 3);
    assert_eq!(done.await.unwrap().results.len(), 3);
}

#[tokio::test]
async fn slow_chunks_shrink_and_yield() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let events = record_events(&mut exec);
    exec.start_stream("s", items(100), worker(&clock, 40), None, chunked(40))
        .unwrap();

    let report = exec
        .pump(&AdaptiveParameters::default(), &TelemetrySample::default())
        .await;

    assert_eq!(report.chunks, 1);
    assert!(report.yielded);
    let snap = exec.snapshot("s").unwrap();
    assert_eq!(snap.processed, 40);
    assert_eq!(snap.chunk_size, 20);
    assert!(events.lock().unwrap().contains(&StreamEvent::ChunkResized {
        stream_id: "s".into(),
        from: 40,
        to: 20,
        reason: ResizeReason::Latency,
    }));
}

#[tokio::test]
async fn fast_chunks_grow_only_with_headroom() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    exec.start_stream("s", items(100), worker(&clock, 8), None, chunked(10))
        .unwrap();
    let busy = TelemetrySample {
        user_active: true,
        ..TelemetrySample::default()
    };

    // 8ms per chunk: on target, no change.
    exec.pump(&AdaptiveParameters::default(), &busy).await;
    assert_eq!(exec.snapshot("s").unwrap().chunk_size, 10);

    let (mut exec, clock) = executor(StreamingConfig::default());
    exec.start_stream("s", items(100), worker(&clock, 2), None, chunked(10))
        .unwrap();
    exec.pump(&AdaptiveParameters::default(), &busy).await;
    assert_eq!(exec.snapshot("s").unwrap().chunk_size, 10);

    let (mut exec, clock) = executor(StreamingConfig::default());
    exec.start_stream("s", items(100), worker(&clock, 2), None, chunked(10))
        .unwrap();
    exec.pump(&AdaptiveParameters::default(), &TelemetrySample::default())
        .await;
    assert!(exec.snapshot("s").unwrap().chunk_size > 10);
}

#[tokio::test]
async fn emergency_runs_one_minimum_chunk_per_pump_round_robin() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let w = worker(&clock, 0);
    exec.start_stream("a", items(20), Arc::clone(&w), None, chunked(50))
        .unwrap();
    exec.start_stream("b", items(20), w, None, chunked(50)).unwrap();

    let params = AdaptiveParameters::derive(&AdaptiveConfig::default(), ProcessingMode::Minimal, true);
    let sample = TelemetrySample::default();

    let report = exec.pump(&params, &sample).await;
    assert_eq!(report.chunks, 1);
    assert!(report.yielded);
    assert_eq!(exec.snapshot("a").unwrap().processed, 5);
    assert_eq!(exec.snapshot("b").unwrap().processed, 0);
    assert_eq!(exec.buffer_capacity(), 32);

    exec.pump(&params, &sample).await;
    assert_eq!(exec.snapshot("b").unwrap().processed, 5);
}

#[tokio::test]
async fn backpressure_forces_minimum_chunks() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let events = record_events(&mut exec);
    exec.apply_backpressure(PressureLevel::High);
    exec.start_stream("s", items(100), worker(&clock, 0), None, chunked(50))
        .unwrap();

    drain(&mut exec, &AdaptiveParameters::default()).await;

    let snap = exec.snapshot("s").unwrap();
    assert_eq!(snap.chunk_size, 5);
    assert_eq!(snap.chunks, 20);
    assert!(events.lock().unwrap().contains(&StreamEvent::ChunkResized {
        stream_id: "s".into(),
        from: 50,
        to: 5,
        reason: ResizeReason::Backpressure,
    }));
}

#[tokio::test]
async fn stream_without_progress_is_stalled() {
    let (mut exec, clock) = executor(StreamingConfig {
        worker_timeout_ms: 20,
        ..StreamingConfig::default()
    });
    let events = record_events(&mut exec);
    let stuck = Arc::new(StuckWorker {
        clock: Arc::clone(&clock),
        per_batch: Duration::from_millis(6_000),
    });
    let done = exec
        .start_stream("s", items(10), stuck, None, StreamOptions::default())
        .unwrap();
    let params = AdaptiveParameters::default();
    let sample = TelemetrySample::default();

    // Two timed-out offers take the stream past the 10s threshold.
    for _ in 0..2 {
        let report = exec.pump(&params, &sample).await;
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.stalled, 0);
    }
    let report = exec.pump(&params, &sample).await;

    assert_eq!(report.stalled, 1);
    assert_eq!(report.chunks, 0);
    assert_eq!(exec.stream_status("s"), Some(StreamStatus::Stalled));
    assert!(matches!(done.await, Err(StreamError::Stalled(_))));
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        StreamEvent::Error {
            kind: StreamErrorKind::Stall,
            ..
        }
    )));
}

#[tokio::test]
async fn unserved_stream_is_not_stalled() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    exec.start_stream("s", items(10), worker(&clock, 0), None, StreamOptions::default())
        .unwrap();

    clock.advance(Duration::from_millis(10_001));
    let report = exec
        .pump(&AdaptiveParameters::default(), &TelemetrySample::default())
        .await;

    assert_eq!(report.stalled, 0);
    assert_eq!(exec.stream_status("s"), Some(StreamStatus::Completed));
}

#[tokio::test]
async fn streams_waiting_their_turn_under_emergency_do_not_stall() {
    let (mut exec, clock) = executor(StreamingConfig {
        stall_threshold_ms: 100,
        ..StreamingConfig::default()
    });
    let w = worker(&clock, 10);
    for i in 0..20 {
        exec.start_stream(format!("s{i}"), items(50), Arc::clone(&w), None, chunked(5))
            .unwrap();
    }
    let params = AdaptiveParameters::derive(&AdaptiveConfig::default(), ProcessingMode::Minimal, true);
    let sample = TelemetrySample::default();

    let mut stalled = 0;
    for _ in 0..40 {
        let report = exec.pump(&params, &sample).await;
        assert_eq!(report.chunks, 1);
        stalled += report.stalled;
    }

    assert_eq!(stalled, 0);
    assert_eq!(exec.active_streams(), 20);
    let processed: usize = (0..20)
        .map(|i| exec.snapshot(&format!("s{i}")).unwrap().processed)
        .sum();
    assert_eq!(processed, 200);
}

#[tokio::test]
async fn worker_timeout_leaves_chunk_uncommitted() {
    let (mut exec, _clock) = executor(StreamingConfig {
        worker_timeout_ms: 20,
        ..StreamingConfig::default()
    });
    exec.start_stream("s", items(30), Arc::new(SlowWorker), None, chunked(10))
        .unwrap();

    let report = exec
        .pump(&AdaptiveParameters::default(), &TelemetrySample::default())
        .await;

    assert_eq!(report.timeouts, 1);
    let snap = exec.snapshot("s").unwrap();
    assert_eq!(snap.processed, 0);
    assert_eq!(snap.chunk_size, 5);
    assert_eq!(snap.status, StreamStatus::Active);
}

#[tokio::test]
async fn result_count_mismatch_fails_the_stream() {
    let (mut exec, _clock) = executor(StreamingConfig::default());
    let done = exec
        .start_stream("s", items(10), Arc::new(ShortWorker), None, chunked(5))
        .unwrap();

    let report = exec
        .pump(&AdaptiveParameters::default(), &TelemetrySample::default())
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(exec.stream_status("s"), Some(StreamStatus::Failed));
    assert!(matches!(done.await, Err(StreamError::Structural { .. })));
}

#[tokio::test]
async fn subscribers_get_partial_batches_then_a_final_delivery() {
    let (mut exec, clock) = executor(StreamingConfig {
        buffer_size: 5,
        ..StreamingConfig::default()
    });
    exec.start_stream("s", items(10), worker(&clock, 0), None, chunked(5))
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    exec.subscribe(
        "s",
        move |d: &StreamDelivery| sink.lock().unwrap().push(d.clone()),
        SubscribeOptions::default(),
    );

    drain(&mut exec, &AdaptiveParameters::default()).await;

    let seen = seen.lock().unwrap();
    assert!(seen.len() >= 2);
    let total: usize = seen.iter().map(|d| d.results.len()).sum();
    assert_eq!(total, 10);
    assert!(seen.last().unwrap().finished);
    assert!(seen[..seen.len() - 1].iter().all(|d| !d.finished));
}

#[tokio::test]
async fn flushing_after_a_drained_stream_calls_no_one() {
    let (mut exec, clock) = executor(StreamingConfig {
        buffer_size: 4,
        ..StreamingConfig::default()
    });
    exec.start_stream("s", items(4), worker(&clock, 0), None, chunked(4))
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    exec.subscribe(
        "s",
        move |d: &StreamDelivery| sink.lock().unwrap().push(d.clone()),
        SubscribeOptions::default(),
    );

    // The capacity flush takes all four results before the stream finishes.
    drain(&mut exec, &AdaptiveParameters::default()).await;
    assert_eq!(exec.buffered(), 0);
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].results.len(), 4);
        assert!(!seen[0].finished);
        assert!(seen[1].finished);
        assert!(seen[1].results.is_empty());
    }

    let late = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&late);
    exec.subscribe(
        "s",
        move |d: &StreamDelivery| sink.lock().unwrap().push(d.clone()),
        SubscribeOptions::default(),
    );

    assert_eq!(exec.flush(), 0);
    assert_eq!(exec.flush(), 0);
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(late.lock().unwrap().is_empty());
}

#[tokio::test]
async fn progress_callback_sees_each_chunk_and_panics_are_contained() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    exec.start_stream(
        "a",
        items(20),
        worker(&clock, 16),
        Some(Box::new(move |p: &StreamProgress| {
            sink.lock().unwrap().push(p.processed)
        })),
        chunked(10),
    )
    .unwrap();
    let done = exec
        .start_stream(
            "b",
            items(5),
            worker(&clock, 0),
            Some(Box::new(|_: &StreamProgress| panic!("bad callback"))),
            StreamOptions::default(),
        )
        .unwrap();

    drain(&mut exec, &AdaptiveParameters::default()).await;

    assert_eq!(*progress.lock().unwrap(), vec![10, 20]);
    assert_eq!(done.await.unwrap().succeeded, 5);
}

#[tokio::test]
async fn events_bracket_the_stream() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    let events = record_events(&mut exec);
    exec.start_stream("s", items(3), worker(&clock, 0), None, StreamOptions::default())
        .unwrap();

    drain(&mut exec, &AdaptiveParameters::default()).await;

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(StreamEvent::Started { total: 3, .. })));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Completed {
            succeeded: 3,
            failed: 0,
            ..
        })
    ));
}

#[tokio::test]
async fn finished_streams_are_pruned_after_retention() {
    let (mut exec, clock) = executor(StreamingConfig::default());
    exec.start_stream("s", items(3), worker(&clock, 0), None, StreamOptions::default())
        .unwrap();
    exec.subscribe("s", |_: &StreamDelivery| {}, SubscribeOptions::default());
    drain(&mut exec, &AdaptiveParameters::default()).await;

    assert_eq!(exec.prune_finished(clock.now()), 0);
    clock.advance(Duration::from_millis(60_000));
    assert_eq!(exec.prune_finished(clock.now()), 1);
    assert_eq!(exec.stream_status("s"), None);
    assert!(exec.is_empty());
}
