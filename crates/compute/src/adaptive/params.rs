use std::time::Duration;

use rota_core::config::AdaptiveConfig;
use rota_core::{PerLevel, Priority, ProcessingMode};
use serde::Serialize;

/// Scheduling parameters in force until the next recompute.
///
/// Values are derived, never mutated: the controller swaps in a new
/// `Arc<AdaptiveParameters>` when telemetry changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveParameters {
    pub time_slice_per_level: PerLevel<Duration>,
    /// Base chunk size for streams starting under these parameters.
    pub chunk_size: usize,
    /// Streams yield after running this long without a break.
    pub yield_interval: Duration,
    pub priority_weights: PerLevel<f64>,
    pub processing_mode: ProcessingMode,
    pub emergency: bool,
}

impl AdaptiveParameters {
    /// Derive parameters for `mode`. Emergency always uses the minimal table.
    pub fn derive(config: &AdaptiveConfig, mode: ProcessingMode, emergency: bool) -> Self {
        let table = if emergency {
            ProcessingMode::Minimal
        } else {
            mode
        };
        let (chunk_size, yield_ms, slice_factor) = match table {
            ProcessingMode::Normal => (config.base_chunk_size, config.base_yield_ms, 1.0),
            ProcessingMode::Reduced => (
                config.reduced_chunk_size,
                config.reduced_yield_ms,
                config.reduced_slice_factor,
            ),
            ProcessingMode::Minimal => (
                config.minimal_chunk_size,
                config.minimal_yield_ms,
                config.minimal_slice_factor,
            ),
        };

        let time_slice_per_level = config.time_slices_ms.map(|level, ms| {
            let base = Duration::from_millis(ms);
            if level == Priority::Critical {
                base
            } else {
                base.mul_f64(slice_factor).max(Duration::from_millis(1))
            }
        });

        Self {
            time_slice_per_level,
            chunk_size,
            yield_interval: Duration::from_millis(yield_ms),
            priority_weights: config.priority_weights,
            processing_mode: mode,
            emergency,
        }
    }
}

impl Default for AdaptiveParameters {
    fn default() -> Self {
        Self::derive(&AdaptiveConfig::default(), ProcessingMode::Normal, false)
    }
}
