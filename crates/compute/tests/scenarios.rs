//! End-to-end behaviour of the runtime: streams under latency and memory
//! pressure, preemption of background work, and emergency detection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rota_compute::adaptive::{AdaptiveController, ControllerEvent};
use rota_compute::scheduler::{from_fn, once, SchedulerEvent, SliceOutcome, TaskSpec};
use rota_compute::streaming::{
    BatchWorker, ChunkSizer, ResizeReason, StreamEvent, StreamOptions, StreamStatus,
};
use rota_compute::Runtime;
use rota_core::config::{AdaptiveConfig, StreamingConfig};
use rota_core::{
    Clock, ManualClock, MemoryReading, PressureLevel, Priority, RuntimeConfig, StaticFeed,
    StreamItemError, TelemetrySample,
};
use serde_json::{json, Value};

/// Echo worker whose every batch takes `per_batch` of clock time.
struct TimedWorker {
    clock: Arc<ManualClock>,
    per_batch: Duration,
}

#[async_trait]
impl BatchWorker for TimedWorker {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>> {
        self.clock.advance(self.per_batch);
        items.iter().map(|v| Ok(v.clone())).collect()
    }
}

struct Harness {
    runtime: Runtime,
    feed: Arc<StaticFeed>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    rota_core::logging::init_for_tests();
    let feed = Arc::new(StaticFeed::new());
    let clock = Arc::new(ManualClock::new());
    let runtime = Runtime::new(RuntimeConfig::default(), feed.clone(), clock.clone()).unwrap();
    Harness {
        runtime,
        feed,
        clock,
    }
}

fn timed(clock: &Arc<ManualClock>, ms: u64) -> Arc<dyn BatchWorker> {
    Arc::new(TimedWorker {
        clock: Arc::clone(clock),
        per_batch: Duration::from_millis(ms),
    })
}

fn items(n: usize) -> Vec<Value> {
    (0..n).map(|i| json!(i)).collect()
}

fn stream_events(rt: &mut Runtime) -> Arc<Mutex<Vec<StreamEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    rt.executor_mut()
        .subscribe_events(move |e| sink.lock().unwrap().push(e.clone()));
    seen
}

#[tokio::test]
async fn slow_chunks_shrink_and_every_item_is_reported() {
    let Harness {
        mut runtime, clock, ..
    } = harness();
    let events = stream_events(&mut runtime);
    let mut done = runtime
        .executor_mut()
        .start_stream(
            "forecast",
            items(100),
            timed(&clock, 30),
            None,
            StreamOptions {
                chunk_size: Some(10),
            },
        )
        .unwrap();

    for _ in 0..100 {
        if runtime.executor().stream_status("forecast") != Some(StreamStatus::Active) {
            break;
        }
        runtime.step().await;
    }

    let combined = done.try_result().unwrap().unwrap();
    assert_eq!(combined.results.len(), 100);
    let mut indices: Vec<_> = combined.results.iter().map(|r| r.index).collect();
    indices.dedup();
    assert_eq!(indices, (0..100).collect::<Vec<_>>());

    let shrinks = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| {
            matches!(
                e,
                StreamEvent::ChunkResized {
                    from,
                    to,
                    reason: ResizeReason::Latency,
                    ..
                } if to < from
            )
        })
        .count();
    assert!(shrinks >= 1);
    assert!(combined.final_chunk_size < 10);
}

#[tokio::test]
async fn critical_work_interrupts_background_prediction_once() {
    let Harness {
        mut runtime, clock, ..
    } = harness();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    runtime
        .scheduler_mut()
        .subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    let handle = runtime.handle();
    let c = Arc::clone(&clock);
    let mut slice = 0;
    runtime
        .scheduler_mut()
        .queue_task(
            TaskSpec::new(
                "predict-week",
                from_fn(move |_| {
                    slice += 1;
                    c.advance(Duration::from_millis(1));
                    if slice == 1 {
                        handle
                            .submit(
                                TaskSpec::new("save-shift", once(|_| Ok(json!("saved"))))
                                    .with_priority(Priority::Critical),
                            )
                            .unwrap();
                        Ok(SliceOutcome::Pending)
                    } else {
                        Ok(SliceOutcome::Complete(json!("prediction")))
                    }
                }),
            )
            .background(),
        )
        .unwrap();
    runtime
        .scheduler_mut()
        .queue_task(TaskSpec::new("archive-month", once(|_| Ok(Value::Null))).background())
        .unwrap();

    let first = runtime.step().await;
    assert!(first.tick.interrupted);
    let waiting: Vec<_> = runtime
        .scheduler()
        .queued_ids(Priority::Background)
        .iter()
        .map(|id| id.as_str().to_string())
        .collect();
    assert_eq!(waiting, vec!["predict-week", "archive-month"]);

    for _ in 0..2 {
        clock.advance(Duration::from_millis(16));
        runtime.step().await;
    }

    let events = events.lock().unwrap();
    let interruptions = events
        .iter()
        .filter(|e| matches!(e, SchedulerEvent::TaskInterrupted { .. }))
        .count();
    assert_eq!(interruptions, 1);

    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskCompleted { task_id, .. } => Some(task_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed[..2], ["save-shift", "predict-week"]);
}

#[tokio::test]
async fn critical_memory_pressure_forces_minimum_chunks_mid_stream() {
    let Harness {
        mut runtime,
        feed,
        clock,
    } = harness();
    let min_chunk = runtime.config().streaming.min_chunk_size;
    let mut done = runtime
        .executor_mut()
        .start_stream(
            "roster",
            items(50),
            timed(&clock, 20),
            None,
            StreamOptions {
                chunk_size: Some(20),
            },
        )
        .unwrap();

    // 20ms per chunk is on target: one chunk per step at the original size.
    runtime.step().await;
    let snap = runtime.executor().snapshot("roster").unwrap();
    assert_eq!(snap.processed, 20);
    assert_eq!(snap.chunk_size, 20);

    feed.set_memory(MemoryReading {
        level: PressureLevel::Critical,
        usage_mb: 100.0,
    });
    let report = runtime.step().await;
    assert_eq!(
        report.pressure_change.map(|c| c.to),
        Some(PressureLevel::Critical)
    );
    assert_eq!(
        runtime.executor().snapshot("roster").unwrap().chunk_size,
        min_chunk
    );

    for _ in 0..20 {
        if runtime.executor().stream_status("roster") != Some(StreamStatus::Active) {
            break;
        }
        runtime.step().await;
    }
    let combined = done.try_result().unwrap().unwrap();
    assert_eq!(combined.results.len(), 50);
    assert_eq!(combined.final_chunk_size, min_chunk);
}

#[test]
fn emergency_needs_two_distress_signals() {
    let clock = ManualClock::new();
    let two_of_four = TelemetrySample {
        fps: 15.0,
        consecutive_dropped_frames: 12,
        ..TelemetrySample::default()
    };
    let one_of_four = TelemetrySample {
        blocked_interactions: 5,
        ..TelemetrySample::default()
    };

    let mut controller = AdaptiveController::new(AdaptiveConfig::default());
    let entered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&entered);
    controller.subscribe(move |e| {
        if let ControllerEvent::EmergencyEntered { signals } = e {
            sink.lock().unwrap().push(*signals);
        }
    });
    let params = controller.recompute(&two_of_four, clock.now());
    assert!(controller.is_emergency());
    assert!(params.emergency);
    assert_eq!(params.chunk_size, AdaptiveConfig::default().minimal_chunk_size);
    assert_eq!(*entered.lock().unwrap(), vec![2]);

    let mut controller = AdaptiveController::new(AdaptiveConfig::default());
    let params = controller.recompute(&one_of_four, clock.now());
    assert!(!controller.is_emergency());
    assert!(!params.emergency);
}

#[tokio::test]
async fn critical_queue_always_wins_the_tick() {
    let Harness {
        mut runtime, clock, ..
    } = harness();
    let sched = runtime.scheduler_mut();
    for i in 0..5 {
        sched
            .queue_task(
                TaskSpec::new(format!("low-{i}"), once(|_| Ok(Value::Null)))
                    .with_priority(Priority::Low),
            )
            .unwrap();
    }
    // Let the low queue build up a large starvation score first.
    clock.advance(Duration::from_secs(30));
    runtime
        .scheduler_mut()
        .queue_task(
            TaskSpec::new("urgent", once(|_| Ok(Value::Null))).with_priority(Priority::Critical),
        )
        .unwrap();

    let report = runtime.step().await;
    assert_eq!(report.tick.level, Some(Priority::Critical));
}

#[tokio::test]
async fn busy_foreground_queue_cannot_starve_background() {
    let Harness {
        mut runtime, clock, ..
    } = harness();
    runtime
        .scheduler_mut()
        .queue_task(TaskSpec::new("cleanup", once(|_| Ok(Value::Null))).background())
        .unwrap();

    let mut serviced = false;
    for round in 0..60 {
        let c = Arc::clone(&clock);
        runtime
            .scheduler_mut()
            .queue_task(
                TaskSpec::new(
                    format!("ui-{round}"),
                    once(move |_| {
                        c.advance(Duration::from_millis(4));
                        Ok(Value::Null)
                    }),
                )
                .with_priority(Priority::High),
            )
            .unwrap();
        clock.advance(Duration::from_millis(16));
        runtime.step().await;
        if !runtime.scheduler().is_live(&"cleanup".into()) {
            serviced = true;
            break;
        }
    }
    assert!(serviced, "background task starved");
}

#[test]
fn chunk_adaptation_stays_within_bounds() {
    let config = StreamingConfig::default();
    let sizer = ChunkSizer::from_config(&config);
    let target = config.target_latency();
    for size in [config.min_chunk_size, 10, 50, config.max_chunk_size] {
        let slower = sizer.next(size, target.mul_f64(1.5), true);
        assert!(slower <= size && slower >= config.min_chunk_size);
        let faster = sizer.next(size, target.mul_f64(0.4), true);
        assert!(faster >= size && faster <= config.max_chunk_size);
    }
}

#[tokio::test]
async fn flushing_nothing_changes_nothing() {
    let Harness { mut runtime, .. } = harness();
    let events = stream_events(&mut runtime);
    assert_eq!(runtime.executor_mut().flush(), 0);
    assert_eq!(runtime.executor().buffered(), 0);
    assert!(events.lock().unwrap().is_empty());
}
