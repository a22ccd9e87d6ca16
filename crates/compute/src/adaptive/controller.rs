use std::sync::Arc;
use std::time::{Duration, Instant};

use rota_core::config::AdaptiveConfig;
use rota_core::{EventBus, ProcessingMode, SubscriptionId, TelemetrySample};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::emergency::{entry_signals, EmergencyDetector, EmergencyTransition};
use super::mode::ModeTracker;
use super::params::AdaptiveParameters;

/// Events published when the controller changes state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    ModeChanged {
        from: ProcessingMode,
        to: ProcessingMode,
    },
    EmergencyEntered {
        /// Distress signals present at entry.
        signals: usize,
    },
    EmergencyExited {
        held: Duration,
    },
}

/// Turns telemetry samples into scheduling parameters.
pub struct AdaptiveController {
    config: AdaptiveConfig,
    modes: ModeTracker,
    emergency: EmergencyDetector,
    params: Arc<AdaptiveParameters>,
    last_update: Option<Instant>,
    events: EventBus<ControllerEvent>,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Self {
        let params = Arc::new(AdaptiveParameters::derive(
            &config,
            ProcessingMode::Normal,
            false,
        ));
        Self {
            modes: ModeTracker::new(config.normal_dwell()),
            emergency: EmergencyDetector::new(config.emergency_min_dwell()),
            params,
            last_update: None,
            events: EventBus::new("adaptive"),
            config,
        }
    }

    /// True when the update interval has elapsed since the last recompute.
    pub fn due(&self, now: Instant) -> bool {
        match self.last_update {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.config.update_interval(),
        }
    }

    /// Fold one sample into the mode and emergency state and return the
    /// parameters now in force. The previous `Arc` is reused when nothing changed.
    pub fn recompute(&mut self, sample: &TelemetrySample, now: Instant) -> Arc<AdaptiveParameters> {
        self.last_update = Some(now);
        let mut changed = false;

        if let Some((from, to)) = self.modes.update(sample, now) {
            info!(?from, ?to, fps = sample.fps, drop_rate = sample.drop_rate, "Processing mode changed");
            self.events.publish(&ControllerEvent::ModeChanged { from, to });
            changed = true;
        }

        match self.emergency.update(sample, now) {
            Some(EmergencyTransition::Entered) => {
                let signals = entry_signals(sample);
                warn!(
                    signals,
                    fps = sample.fps,
                    consecutive_dropped = sample.consecutive_dropped_frames,
                    blocked = sample.blocked_interactions,
                    frame_time_ms = sample.frame_time_ms,
                    "Emergency mode entered"
                );
                self.events
                    .publish(&ControllerEvent::EmergencyEntered { signals });
                changed = true;
            }
            Some(EmergencyTransition::Exited { held }) => {
                info!(held_ms = held.as_millis() as u64, "Emergency mode exited");
                self.events.publish(&ControllerEvent::EmergencyExited { held });
                changed = true;
            }
            None => {}
        }

        if changed {
            self.params = Arc::new(AdaptiveParameters::derive(
                &self.config,
                self.modes.mode(),
                self.emergency.is_active(),
            ));
            debug!(
                chunk_size = self.params.chunk_size,
                yield_ms = self.params.yield_interval.as_millis() as u64,
                "Adaptive parameters recomputed"
            );
        }
        Arc::clone(&self.params)
    }

    pub fn parameters(&self) -> Arc<AdaptiveParameters> {
        Arc::clone(&self.params)
    }

    pub fn mode(&self) -> ProcessingMode {
        self.modes.mode()
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.is_active()
    }

    pub fn subscribe(
        &mut self,
        callback: impl Fn(&ControllerEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }
}

impl std::fmt::Debug for AdaptiveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveController")
            .field("mode", &self.modes.mode())
            .field("emergency", &self.emergency.is_active())
            .field("last_update", &self.last_update)
            .finish()
    }
}
