use std::time::{Duration, Instant};

use rota_core::{ProcessingMode, TelemetrySample};

/// Mode a single sample asks for, before hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSignal {
    Minimal,
    Reduced,
    /// Healthy enough to count toward a return to normal.
    Healthy,
    /// Neither degraded nor healthy; keep the current mode.
    Hold,
}

pub fn classify(sample: &TelemetrySample) -> ModeSignal {
    let fps = sample.fps;
    let drop = sample.drop_rate;
    let active = sample.user_active;
    if fps < 20.0 || drop > 0.5 || (active && fps < 30.0) {
        ModeSignal::Minimal
    } else if fps < 40.0 || drop > 0.2 || (active && fps < 45.0) {
        ModeSignal::Reduced
    } else if fps > 50.0 && drop < 0.1 {
        ModeSignal::Healthy
    } else {
        ModeSignal::Hold
    }
}

/// Processing mode with a dwell requirement on the way back to normal.
#[derive(Debug, Clone)]
pub struct ModeTracker {
    mode: ProcessingMode,
    healthy_since: Option<Instant>,
    dwell: Duration,
}

impl ModeTracker {
    pub fn new(dwell: Duration) -> Self {
        Self {
            mode: ProcessingMode::Normal,
            healthy_since: None,
            dwell,
        }
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Feed one sample. Returns `(from, to)` when the mode changed.
    pub fn update(
        &mut self,
        sample: &TelemetrySample,
        now: Instant,
    ) -> Option<(ProcessingMode, ProcessingMode)> {
        let next = match classify(sample) {
            ModeSignal::Minimal => {
                self.healthy_since = None;
                ProcessingMode::Minimal
            }
            ModeSignal::Reduced => {
                self.healthy_since = None;
                ProcessingMode::Reduced
            }
            ModeSignal::Healthy if self.mode == ProcessingMode::Normal => {
                self.healthy_since = None;
                ProcessingMode::Normal
            }
            ModeSignal::Healthy => {
                let since = *self.healthy_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= self.dwell {
                    self.healthy_since = None;
                    ProcessingMode::Normal
                } else {
                    self.mode
                }
            }
            ModeSignal::Hold => {
                self.healthy_since = None;
                self.mode
            }
        };

        if next == self.mode {
            return None;
        }
        let from = self.mode;
        self.mode = next;
        Some((from, next))
    }
}
