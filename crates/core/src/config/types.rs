use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{PerLevel, Priority, PressureLevel};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the responsive compute core.
///
/// Parsed from `rota.toml` with support for environment variable overrides.
/// Every section has defaults, so an empty document is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

// ── Scheduler ───────────────────────────────────────────────────────

/// Priority scheduler section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduling cadence: one tick per interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum tasks dispatched in one tick.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Failed tasks are retried (one level lower) this many times before dropping.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Multiplier applied to the tick budget while the user is interacting.
    #[serde(default = "default_user_active_slice_factor")]
    pub user_active_slice_factor: f64,

    /// Multiplier for low/background slices and weights under high memory pressure.
    #[serde(default = "default_high_pressure_factor")]
    pub high_pressure_factor: f64,

    /// Multiplier for low/background slices and weights under critical memory pressure.
    #[serde(default = "default_critical_pressure_factor")]
    pub critical_pressure_factor: f64,

    /// Terminal task outcomes kept for metrics.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Task kind -> priority, consulted when a task has no explicit priority.
    #[serde(default = "default_kind_priorities")]
    pub kind_priorities: HashMap<String, Priority>,
}

fn default_tick_interval_ms() -> u64 {
    16
}
fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_active_slice_factor() -> f64 {
    0.5
}
fn default_high_pressure_factor() -> f64 {
    0.5
}
fn default_critical_pressure_factor() -> f64 {
    0.25
}
fn default_history_size() -> usize {
    256
}

fn default_kind_priorities() -> HashMap<String, Priority> {
    [
        ("ui_update", Priority::Critical),
        ("shift_edit", Priority::High),
        ("coverage_check", Priority::Normal),
        ("feature_generation", Priority::Low),
        ("prediction", Priority::Background),
    ]
    .into_iter()
    .map(|(k, p)| (k.to_string(), p))
    .collect()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_retries: default_max_retries(),
            user_active_slice_factor: default_user_active_slice_factor(),
            high_pressure_factor: default_high_pressure_factor(),
            critical_pressure_factor: default_critical_pressure_factor(),
            history_size: default_history_size(),
            kind_priorities: default_kind_priorities(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Slice/weight multiplier for low and background work at `level`.
    pub fn pressure_factor(&self, level: PressureLevel) -> f64 {
        match level {
            PressureLevel::Normal | PressureLevel::Warning => 1.0,
            PressureLevel::High => self.high_pressure_factor,
            PressureLevel::Critical => self.critical_pressure_factor,
        }
    }
}

// ── Adaptive controller ─────────────────────────────────────────────

/// Adaptive controller section: per-mode parameter tables and hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// How often parameters are recomputed from telemetry.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Per-level tick budget in normal mode.
    #[serde(default = "default_time_slices_ms")]
    pub time_slices_ms: PerLevel<u64>,

    /// Starvation-score weights. Must be strictly positive.
    #[serde(default = "default_priority_weights")]
    pub priority_weights: PerLevel<f64>,

    #[serde(default = "default_base_chunk_size")]
    pub base_chunk_size: usize,
    #[serde(default = "default_reduced_chunk_size")]
    pub reduced_chunk_size: usize,
    #[serde(default = "default_minimal_chunk_size")]
    pub minimal_chunk_size: usize,

    #[serde(default = "default_base_yield_ms")]
    pub base_yield_ms: u64,
    #[serde(default = "default_reduced_yield_ms")]
    pub reduced_yield_ms: u64,
    #[serde(default = "default_minimal_yield_ms")]
    pub minimal_yield_ms: u64,

    /// Non-critical slice multiplier in reduced mode.
    #[serde(default = "default_reduced_slice_factor")]
    pub reduced_slice_factor: f64,
    /// Non-critical slice multiplier in minimal mode.
    #[serde(default = "default_minimal_slice_factor")]
    pub minimal_slice_factor: f64,

    /// Good telemetry must hold this long before returning to normal mode.
    #[serde(default = "default_normal_dwell_ms")]
    pub normal_dwell_ms: u64,

    /// Minimum time spent in emergency mode before it may exit.
    #[serde(default = "default_emergency_min_dwell_ms")]
    pub emergency_min_dwell_ms: u64,
}

fn default_update_interval_ms() -> u64 {
    250
}
fn default_time_slices_ms() -> PerLevel<u64> {
    PerLevel {
        critical: 50,
        high: 16,
        normal: 10,
        low: 6,
        background: 4,
    }
}
fn default_priority_weights() -> PerLevel<f64> {
    PerLevel {
        critical: 16.0,
        high: 8.0,
        normal: 4.0,
        low: 2.0,
        background: 1.0,
    }
}
fn default_base_chunk_size() -> usize {
    50
}
fn default_reduced_chunk_size() -> usize {
    20
}
fn default_minimal_chunk_size() -> usize {
    5
}
fn default_base_yield_ms() -> u64 {
    16
}
fn default_reduced_yield_ms() -> u64 {
    8
}
fn default_minimal_yield_ms() -> u64 {
    4
}
fn default_reduced_slice_factor() -> f64 {
    0.5
}
fn default_minimal_slice_factor() -> f64 {
    0.25
}
fn default_normal_dwell_ms() -> u64 {
    2_000
}
fn default_emergency_min_dwell_ms() -> u64 {
    5_000
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            time_slices_ms: default_time_slices_ms(),
            priority_weights: default_priority_weights(),
            base_chunk_size: default_base_chunk_size(),
            reduced_chunk_size: default_reduced_chunk_size(),
            minimal_chunk_size: default_minimal_chunk_size(),
            base_yield_ms: default_base_yield_ms(),
            reduced_yield_ms: default_reduced_yield_ms(),
            minimal_yield_ms: default_minimal_yield_ms(),
            reduced_slice_factor: default_reduced_slice_factor(),
            minimal_slice_factor: default_minimal_slice_factor(),
            normal_dwell_ms: default_normal_dwell_ms(),
            emergency_min_dwell_ms: default_emergency_min_dwell_ms(),
        }
    }
}

impl AdaptiveConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn normal_dwell(&self) -> Duration {
        Duration::from_millis(self.normal_dwell_ms)
    }

    pub fn emergency_min_dwell(&self) -> Duration {
        Duration::from_millis(self.emergency_min_dwell_ms)
    }
}

// ── Streaming executor ──────────────────────────────────────────────

/// Streaming executor section: chunk sizing, delivery, and stall detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Desired wall-clock time for one chunk.
    #[serde(default = "default_target_latency_ms")]
    pub target_latency_ms: u64,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Chunk size is divided by this when a chunk runs too long.
    #[serde(default = "default_shrink_divisor")]
    pub shrink_divisor: f64,
    /// Chunk size is multiplied by this when a chunk runs fast and telemetry is good.
    #[serde(default = "default_grow_multiplier")]
    pub grow_multiplier: f64,

    /// Result buffer capacity; reaching it forces a flush.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Buffer capacity used under backpressure.
    #[serde(default = "default_min_buffer_size")]
    pub min_buffer_size: usize,

    /// Buffered results are flushed at least this often.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// A stream without progress for this long is marked stalled.
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,

    /// Bound on how long one worker batch is awaited.
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,

    /// Finished streams are kept this long for status queries.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

fn default_target_latency_ms() -> u64 {
    16
}
fn default_min_chunk_size() -> usize {
    5
}
fn default_max_chunk_size() -> usize {
    200
}
fn default_shrink_divisor() -> f64 {
    2.0
}
fn default_grow_multiplier() -> f64 {
    1.5
}
fn default_buffer_size() -> usize {
    256
}
fn default_min_buffer_size() -> usize {
    32
}
fn default_flush_interval_ms() -> u64 {
    100
}
fn default_stall_threshold_ms() -> u64 {
    10_000
}
fn default_worker_timeout_ms() -> u64 {
    2_000
}
fn default_retention_ms() -> u64 {
    60_000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: default_target_latency_ms(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            shrink_divisor: default_shrink_divisor(),
            grow_multiplier: default_grow_multiplier(),
            buffer_size: default_buffer_size(),
            min_buffer_size: default_min_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
            stall_threshold_ms: default_stall_threshold_ms(),
            worker_timeout_ms: default_worker_timeout_ms(),
            retention_ms: default_retention_ms(),
        }
    }
}

impl StreamingConfig {
    pub fn target_latency(&self) -> Duration {
        Duration::from_millis(self.target_latency_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

// ── Memory coordinator ──────────────────────────────────────────────

/// Cleanup behaviour while a given pressure level is active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CleanupPolicy {
    /// Resources unused for longer than this are disposed.
    pub max_age_ms: u64,
    /// Largest-first eviction stops once tracked usage is under this.
    pub size_threshold_mb: f64,
    /// Periodic cleanup cadence.
    pub frequency_ms: u64,
    /// Skip recently used resources during age-based eviction.
    pub retain_recently_used: bool,
}

impl CleanupPolicy {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.frequency_ms)
    }

    pub fn size_threshold_bytes(&self) -> u64 {
        (self.size_threshold_mb * 1024.0 * 1024.0) as u64
    }
}

/// One cleanup policy per pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub normal: CleanupPolicy,
    pub warning: CleanupPolicy,
    pub high: CleanupPolicy,
    pub critical: CleanupPolicy,
}

impl PolicyTable {
    pub fn get(&self, level: PressureLevel) -> CleanupPolicy {
        match level {
            PressureLevel::Normal => self.normal,
            PressureLevel::Warning => self.warning,
            PressureLevel::High => self.high,
            PressureLevel::Critical => self.critical,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            normal: CleanupPolicy {
                max_age_ms: 300_000,
                size_threshold_mb: 512.0,
                frequency_ms: 60_000,
                retain_recently_used: true,
            },
            warning: CleanupPolicy {
                max_age_ms: 120_000,
                size_threshold_mb: 384.0,
                frequency_ms: 30_000,
                retain_recently_used: true,
            },
            high: CleanupPolicy {
                max_age_ms: 60_000,
                size_threshold_mb: 256.0,
                frequency_ms: 10_000,
                retain_recently_used: true,
            },
            critical: CleanupPolicy {
                max_age_ms: 15_000,
                size_threshold_mb: 128.0,
                frequency_ms: 5_000,
                retain_recently_used: false,
            },
        }
    }
}

/// Memory pressure coordinator section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Usage budget the level thresholds are fractions of.
    #[serde(default = "default_budget_mb")]
    pub budget_mb: f64,

    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,
    #[serde(default = "default_high_ratio")]
    pub high_ratio: f64,
    #[serde(default = "default_critical_ratio")]
    pub critical_ratio: f64,

    /// Number of usage samples in the rolling average.
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,

    /// Resources touched within this window count as recently used.
    #[serde(default = "default_recent_use_ms")]
    pub recent_use_ms: u64,

    #[serde(default)]
    pub policies: PolicyTable,
}

fn default_budget_mb() -> f64 {
    1024.0
}
fn default_warning_ratio() -> f64 {
    0.6
}
fn default_high_ratio() -> f64 {
    0.75
}
fn default_critical_ratio() -> f64 {
    0.9
}
fn default_sample_window() -> usize {
    5
}
fn default_recent_use_ms() -> u64 {
    5_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_mb: default_budget_mb(),
            warning_ratio: default_warning_ratio(),
            high_ratio: default_high_ratio(),
            critical_ratio: default_critical_ratio(),
            sample_window: default_sample_window(),
            recent_use_ms: default_recent_use_ms(),
            policies: PolicyTable::default(),
        }
    }
}

impl MemoryConfig {
    pub fn recent_use(&self) -> Duration {
        Duration::from_millis(self.recent_use_ms)
    }

    /// Map an average usage figure onto a pressure level.
    pub fn level_for(&self, usage_mb: f64) -> PressureLevel {
        let ratio = usage_mb / self.budget_mb;
        if ratio >= self.critical_ratio {
            PressureLevel::Critical
        } else if ratio >= self.high_ratio {
            PressureLevel::High
        } else if ratio >= self.warning_ratio {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }
}
