//! Telemetry consumed by the adaptive loop.
//!
//! The host supplies a [`TelemetryFeed`]; the runtime captures one
//! [`TelemetrySample`] per step and treats it as read-only for that step.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::types::PressureLevel;

/// Frame timing as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub fps: f64,
    pub avg_frame_time_ms: f64,
    /// Fraction of frames dropped over the host's window, 0.0 - 1.0.
    pub drop_rate: f64,
    pub consecutive_dropped_frames: u32,
    /// Interactions that waited on the main thread longer than the host allows.
    pub blocked_interactions: u32,
}

impl Default for FrameMetrics {
    fn default() -> Self {
        Self {
            fps: 60.0,
            avg_frame_time_ms: 16.7,
            drop_rate: 0.0,
            consecutive_dropped_frames: 0,
            blocked_interactions: 0,
        }
    }
}

/// Memory usage as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MemoryReading {
    pub level: PressureLevel,
    pub usage_mb: f64,
}

/// User interaction state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InteractionState {
    pub is_active: bool,
    pub last_interaction_type: Option<String>,
}

/// Source of live telemetry, implemented by the host.
pub trait TelemetryFeed: Send + Sync {
    fn frame_metrics(&self) -> FrameMetrics;
    fn memory_pressure(&self) -> MemoryReading;
    fn interaction_state(&self) -> InteractionState;
}

/// Blanket implementation so `Arc<dyn TelemetryFeed>` can be used directly.
impl<T: TelemetryFeed + ?Sized> TelemetryFeed for Arc<T> {
    fn frame_metrics(&self) -> FrameMetrics {
        (**self).frame_metrics()
    }

    fn memory_pressure(&self) -> MemoryReading {
        (**self).memory_pressure()
    }

    fn interaction_state(&self) -> InteractionState {
        (**self).interaction_state()
    }
}

/// Snapshot of every telemetry signal at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub frame_time_ms: f64,
    pub fps: f64,
    pub drop_rate: f64,
    pub consecutive_dropped_frames: u32,
    pub blocked_interactions: u32,
    pub memory_pressure_level: PressureLevel,
    pub memory_usage_mb: f64,
    pub user_active: bool,
    pub last_interaction_type: Option<String>,
}

impl TelemetrySample {
    /// Read every signal from the feed once.
    pub fn capture(feed: &dyn TelemetryFeed) -> Self {
        let frames = feed.frame_metrics();
        let memory = feed.memory_pressure();
        let interaction = feed.interaction_state();
        Self::from_parts(frames, memory, interaction)
    }

    pub fn from_parts(
        frames: FrameMetrics,
        memory: MemoryReading,
        interaction: InteractionState,
    ) -> Self {
        Self {
            frame_time_ms: frames.avg_frame_time_ms,
            fps: frames.fps,
            drop_rate: frames.drop_rate,
            consecutive_dropped_frames: frames.consecutive_dropped_frames,
            blocked_interactions: frames.blocked_interactions,
            memory_pressure_level: memory.level,
            memory_usage_mb: memory.usage_mb,
            user_active: interaction.is_active,
            last_interaction_type: interaction.last_interaction_type,
        }
    }

    /// Headroom is available: smooth frames and no interaction in progress.
    pub fn is_good(&self) -> bool {
        self.fps > 45.0 && self.drop_rate < 0.1 && !self.user_active
    }
}

impl Default for TelemetrySample {
    fn default() -> Self {
        Self::from_parts(
            FrameMetrics::default(),
            MemoryReading::default(),
            InteractionState::default(),
        )
    }
}

/// Feed holding a snapshot the host overwrites as its own sensors update.
#[derive(Debug, Default)]
pub struct StaticFeed {
    frames: RwLock<FrameMetrics>,
    memory: RwLock<MemoryReading>,
    interaction: RwLock<InteractionState>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frames(&self, frames: FrameMetrics) {
        if let Ok(mut guard) = self.frames.write() {
            *guard = frames;
        }
    }

    pub fn set_memory(&self, memory: MemoryReading) {
        if let Ok(mut guard) = self.memory.write() {
            *guard = memory;
        }
    }

    pub fn set_interaction(&self, interaction: InteractionState) {
        if let Ok(mut guard) = self.interaction.write() {
            *guard = interaction;
        }
    }
}

impl TelemetryFeed for StaticFeed {
    fn frame_metrics(&self) -> FrameMetrics {
        self.frames.read().map(|g| *g).unwrap_or_default()
    }

    fn memory_pressure(&self) -> MemoryReading {
        self.memory.read().map(|g| *g).unwrap_or_default()
    }

    fn interaction_state(&self) -> InteractionState {
        self.interaction
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_reads_every_signal() {
        let feed = StaticFeed::new();
        feed.set_frames(FrameMetrics {
            fps: 28.0,
            avg_frame_time_ms: 35.0,
            drop_rate: 0.3,
            consecutive_dropped_frames: 4,
            blocked_interactions: 1,
        });
        feed.set_memory(MemoryReading {
            level: PressureLevel::Warning,
            usage_mb: 612.0,
        });
        feed.set_interaction(InteractionState {
            is_active: true,
            last_interaction_type: Some("drag".into()),
        });

        let sample = TelemetrySample::capture(&feed);
        assert_eq!(sample.fps, 28.0);
        assert_eq!(sample.frame_time_ms, 35.0);
        assert_eq!(sample.memory_pressure_level, PressureLevel::Warning);
        assert!(sample.user_active);
        assert_eq!(sample.last_interaction_type.as_deref(), Some("drag"));
    }

    #[test]
    fn good_telemetry_requires_idle_user() {
        let mut sample = TelemetrySample::default();
        assert!(sample.is_good());

        sample.user_active = true;
        assert!(!sample.is_good());

        sample.user_active = false;
        sample.drop_rate = 0.15;
        assert!(!sample.is_good());
    }
}
