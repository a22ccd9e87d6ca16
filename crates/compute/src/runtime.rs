//! The cooperative loop that wires every component together.
//!
//! One [`Runtime::step`] samples telemetry, folds memory pressure into
//! backpressure, refreshes the adaptive parameters when due, then runs one
//! scheduler tick and one streaming pump on the same timeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rota_core::{ConfigurationError, RuntimeConfig, SharedClock, TelemetryFeed, TelemetrySample};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::adaptive::AdaptiveController;
use crate::memory::{CleanupReport, MemoryCoordinator, PressureChange};
use crate::scheduler::{PriorityScheduler, SchedulerHandle, TickContext, TickReport};
use crate::streaming::{PumpReport, StreamingExecutor};

/// What one step did.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub pressure_change: Option<PressureChange>,
    /// Adaptive parameters were recomputed this step.
    pub recomputed: bool,
    pub tick: TickReport,
    pub pump: PumpReport,
    pub cleanup: Option<CleanupReport>,
    /// Retained streams dropped this step.
    pub pruned: usize,
}

pub struct Runtime {
    config: RuntimeConfig,
    clock: SharedClock,
    feed: Arc<dyn TelemetryFeed>,
    scheduler: PriorityScheduler,
    executor: StreamingExecutor,
    memory: MemoryCoordinator,
    controller: AdaptiveController,
    steps: u64,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        feed: Arc<dyn TelemetryFeed>,
        clock: SharedClock,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        config.log_summary();
        Ok(Self {
            scheduler: PriorityScheduler::new(config.scheduler.clone(), Arc::clone(&clock)),
            executor: StreamingExecutor::new(config.streaming.clone(), Arc::clone(&clock)),
            memory: MemoryCoordinator::new(config.memory.clone(), Arc::clone(&clock)),
            controller: AdaptiveController::new(config.adaptive.clone()),
            steps: 0,
            config,
            clock,
            feed,
        })
    }

    /// Run one pass of the loop.
    pub async fn step(&mut self) -> StepReport {
        let mut report = StepReport::default();
        self.steps += 1;
        self.scheduler.drain_inbox();

        let sample = TelemetrySample::capture(&*self.feed);
        if let Some(change) = self
            .memory
            .observe(sample.memory_usage_mb, sample.memory_pressure_level)
        {
            self.scheduler.apply_backpressure(change.to);
            self.executor.apply_backpressure(change.to);
            report.pressure_change = Some(change);
        }

        let now = self.clock.now();
        let params = if self.controller.due(now) {
            report.recomputed = true;
            self.controller.recompute(&sample, now)
        } else {
            self.controller.parameters()
        };

        report.tick = self
            .scheduler
            .tick(&TickContext {
                params: &params,
                telemetry: &sample,
            })
            .await;
        report.pump = self.executor.pump(&params, &sample).await;

        report.cleanup = self.memory.maybe_cleanup();
        report.pruned = self.executor.prune_finished(self.clock.now());
        report
    }

    /// Step at the scheduler cadence until `shutdown` is raised. Returns the
    /// number of steps taken by this call.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> u64 {
        let cadence = self.config.scheduler.tick_interval();
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = cadence.as_millis() as u64, "Runtime loop started");

        let start = self.steps;
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            let report = self.step().await;
            if report.tick.dispatched > 0 || report.pump.chunks > 0 {
                debug!(
                    dispatched = report.tick.dispatched,
                    completed = report.tick.completed,
                    chunks = report.pump.chunks,
                    "Step"
                );
            }
        }

        let steps = self.steps - start;
        info!(steps, "Runtime loop stopped");
        steps
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut PriorityScheduler {
        &mut self.scheduler
    }

    pub fn executor(&self) -> &StreamingExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut StreamingExecutor {
        &mut self.executor
    }

    pub fn memory(&self) -> &MemoryCoordinator {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryCoordinator {
        &mut self.memory
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AdaptiveController {
        &mut self.controller
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("executor", &self.executor)
            .field("memory", &self.memory)
            .field("steps", &self.steps)
            .finish()
    }
}
