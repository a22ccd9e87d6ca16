use std::time::Duration;

use rota_core::config::StreamingConfig;

/// Latency-driven chunk size adaptation.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    min: usize,
    max: usize,
    target: Duration,
    shrink_divisor: f64,
    grow_multiplier: f64,
}

impl ChunkSizer {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            min: config.min_chunk_size,
            max: config.max_chunk_size,
            target: config.target_latency(),
            shrink_divisor: config.shrink_divisor,
            grow_multiplier: config.grow_multiplier,
        }
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max)
    }

    pub fn shrink(&self, current: usize) -> usize {
        let next = (current as f64 / self.shrink_divisor).floor() as usize;
        self.clamp(next)
    }

    pub fn grow(&self, current: usize) -> usize {
        let next = (current as f64 * self.grow_multiplier).ceil() as usize;
        self.clamp(next)
    }

    /// Size for the next chunk given the last chunk's latency.
    ///
    /// Shrinks above 1.5x target; grows below 0.5x target only when telemetry
    /// shows headroom.
    pub fn next(&self, current: usize, latency: Duration, headroom: bool) -> usize {
        let latency = latency.as_secs_f64();
        let target = self.target.as_secs_f64();
        if latency > target * 1.5 {
            self.shrink(current)
        } else if latency < target * 0.5 && headroom {
            self.grow(current)
        } else {
            self.clamp(current)
        }
    }
}
