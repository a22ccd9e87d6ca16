use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rota_core::config::{CleanupPolicy, MemoryConfig};
use rota_core::{EventBus, PressureLevel, SharedClock, SubscriptionId};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::registry::{DisposeFn, ResourceHandle, ResourceInfo, ResourceRegistry};
use super::usage::RollingUsage;

/// A transition between pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PressureChange {
    pub from: PressureLevel,
    pub to: PressureLevel,
}

impl PressureChange {
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub items_reclaimed: usize,
    pub bytes_reclaimed: u64,
    pub duration: Duration,
    /// Pressure level whose policy drove the pass.
    pub level: PressureLevel,
}

/// Host hook run as the last cleanup phase. Returns bytes reclaimed.
pub trait Collector: Send {
    fn collect(&mut self, level: PressureLevel) -> u64;
}

impl<F> Collector for F
where
    F: FnMut(PressureLevel) -> u64 + Send,
{
    fn collect(&mut self, level: PressureLevel) -> u64 {
        self(level)
    }
}

/// Tracks usage, derives the pressure level, and runs cleanup passes.
pub struct MemoryCoordinator {
    config: MemoryConfig,
    clock: SharedClock,
    usage: RollingUsage,
    level: PressureLevel,
    policy: CleanupPolicy,
    registry: ResourceRegistry,
    collectors: Vec<Box<dyn Collector>>,
    events: EventBus<PressureChange>,
    last_cleanup: Instant,
    cleanups: u64,
}

impl MemoryCoordinator {
    pub fn new(config: MemoryConfig, clock: SharedClock) -> Self {
        let level = PressureLevel::Normal;
        Self {
            usage: RollingUsage::new(config.sample_window),
            policy: config.policies.get(level),
            last_cleanup: clock.now(),
            level,
            registry: ResourceRegistry::new(),
            collectors: Vec::new(),
            events: EventBus::new("memory"),
            cleanups: 0,
            config,
            clock,
        }
    }

    pub fn pressure_level(&self) -> PressureLevel {
        self.level
    }

    pub fn policy(&self) -> CleanupPolicy {
        self.policy
    }

    pub fn average_usage_mb(&self) -> f64 {
        self.usage.average()
    }

    /// Feed one usage sample. The host's own level wins when it is higher.
    ///
    /// Escalation to high or critical runs a cleanup pass before returning.
    pub fn observe(&mut self, usage_mb: f64, reported: PressureLevel) -> Option<PressureChange> {
        let average = self.usage.push(usage_mb);
        let next = self.config.level_for(average).max(reported);
        if next == self.level {
            return None;
        }

        let change = PressureChange {
            from: self.level,
            to: next,
        };
        self.level = next;
        self.policy = self.config.policies.get(next);
        if change.is_escalation() {
            warn!(from = ?change.from, to = ?change.to, average_mb = average, "Memory pressure rising");
        } else {
            info!(from = ?change.from, to = ?change.to, average_mb = average, "Memory pressure easing");
        }
        self.events.publish(&change);

        if change.is_escalation() && next.is_backpressure() {
            self.force_cleanup();
        }
        Some(change)
    }

    /// Call `callback` whenever pressure changes to `level`.
    pub fn on_pressure_change(
        &mut self,
        level: PressureLevel,
        callback: impl Fn(&PressureChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(move |change: &PressureChange| {
            if change.to == level {
                callback(change);
            }
        })
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Run every cleanup phase under the current policy.
    pub fn force_cleanup(&mut self) -> CleanupReport {
        let started = self.clock.now();
        let level = self.level;
        let policy = self.policy;
        let mut items = 0;
        let mut bytes = 0;
        let mut reclaim = |registry: &mut ResourceRegistry, handles: Vec<ResourceHandle>| {
            for handle in handles {
                if let Some(size) = registry.release(handle) {
                    items += 1;
                    bytes += size;
                }
            }
        };

        let orphaned = self.registry.orphaned();
        reclaim(&mut self.registry, orphaned);

        let recent = policy
            .retain_recently_used
            .then(|| self.config.recent_use());
        let aged = self.registry.older_than(started, policy.max_age(), recent);
        reclaim(&mut self.registry, aged);

        if level.is_backpressure() {
            let threshold = policy.size_threshold_bytes();
            for handle in self.registry.largest_first() {
                if self.registry.tracked_bytes() <= threshold {
                    break;
                }
                reclaim(&mut self.registry, vec![handle]);
            }
        }

        for collector in &mut self.collectors {
            match catch_unwind(AssertUnwindSafe(|| collector.collect(level))) {
                Ok(freed) => bytes += freed,
                Err(_) => error!(level = ?level, "collector panicked"),
            }
        }

        let finished = self.clock.now();
        self.last_cleanup = finished;
        self.cleanups += 1;
        let report = CleanupReport {
            items_reclaimed: items,
            bytes_reclaimed: bytes,
            duration: finished.saturating_duration_since(started),
            level,
        };
        info!(
            level = ?level,
            items = report.items_reclaimed,
            bytes = report.bytes_reclaimed,
            remaining = self.registry.len(),
            "Cleanup pass finished"
        );
        report
    }

    /// Run a cleanup pass if the active policy's frequency has elapsed.
    pub fn maybe_cleanup(&mut self) -> Option<CleanupReport> {
        let now = self.clock.now();
        if now.saturating_duration_since(self.last_cleanup) < self.policy.frequency() {
            return None;
        }
        debug!(level = ?self.level, "Periodic cleanup due");
        Some(self.force_cleanup())
    }

    pub fn register(&mut self, owner: &str, size_bytes: u64, dispose: DisposeFn) -> ResourceHandle {
        let now = self.clock.now();
        let handle = self.registry.register(owner, size_bytes, dispose, now);
        debug!(owner, bytes = size_bytes, tracked = self.registry.tracked_bytes(), "Resource registered");
        handle
    }

    pub fn touch(&mut self, handle: ResourceHandle) -> bool {
        let now = self.clock.now();
        self.registry.touch(handle, now)
    }

    pub fn mark_orphaned(&mut self, handle: ResourceHandle) -> bool {
        self.registry.mark_orphaned(handle)
    }

    /// Dispose a resource now. Stale handles are ignored.
    pub fn release(&mut self, handle: ResourceHandle) -> bool {
        self.registry.release(handle).is_some()
    }

    pub fn resource(&self, handle: ResourceHandle) -> Option<ResourceInfo> {
        self.registry.info(handle)
    }

    pub fn add_collector(&mut self, collector: impl Collector + 'static) {
        self.collectors.push(Box::new(collector));
    }

    pub fn tracked_bytes(&self) -> u64 {
        self.registry.tracked_bytes()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn cleanups(&self) -> u64 {
        self.cleanups
    }
}

impl std::fmt::Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("level", &self.level)
            .field("registry", &self.registry)
            .field("collectors", &self.collectors.len())
            .field("cleanups", &self.cleanups)
            .finish()
    }
}
