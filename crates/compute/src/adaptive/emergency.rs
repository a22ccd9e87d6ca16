use std::time::{Duration, Instant};

use rota_core::TelemetrySample;

/// Distress signals present in `sample`, out of four.
pub fn entry_signals(sample: &TelemetrySample) -> usize {
    [
        sample.fps < 20.0,
        sample.consecutive_dropped_frames > 10,
        sample.blocked_interactions > 3,
        sample.frame_time_ms > 50.0,
    ]
    .into_iter()
    .filter(|hit| *hit)
    .count()
}

/// Recovery signals present in `sample`, out of three.
pub fn exit_signals(sample: &TelemetrySample) -> usize {
    [
        sample.fps > 30.0,
        sample.consecutive_dropped_frames < 3,
        sample.frame_time_ms < 33.0,
    ]
    .into_iter()
    .filter(|hit| *hit)
    .count()
}

/// Two-of-N emergency trigger with a minimum dwell before exit.
#[derive(Debug, Clone)]
pub struct EmergencyDetector {
    active_since: Option<Instant>,
    min_dwell: Duration,
}

/// Emergency state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyTransition {
    Entered,
    Exited { held: Duration },
}

impl EmergencyDetector {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            active_since: None,
            min_dwell,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_since.is_some()
    }

    pub fn update(&mut self, sample: &TelemetrySample, now: Instant) -> Option<EmergencyTransition> {
        match self.active_since {
            None if entry_signals(sample) >= 2 => {
                self.active_since = Some(now);
                Some(EmergencyTransition::Entered)
            }
            None => None,
            Some(since) => {
                let held = now.saturating_duration_since(since);
                if held >= self.min_dwell && exit_signals(sample) >= 2 {
                    self.active_since = None;
                    Some(EmergencyTransition::Exited { held })
                } else {
                    None
                }
            }
        }
    }
}
