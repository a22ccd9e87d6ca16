use std::path::Path;
use std::str::FromStr;

use crate::error::RotaError;

use super::types::RuntimeConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|v| v.parse().ok())
}

impl RuntimeConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RotaError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RotaError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, RotaError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `ROTA_SECTION_KEY` overrides `section.key`.
    /// Examples:
    /// - `ROTA_SCHEDULER_TICK_INTERVAL_MS` -> `scheduler.tick_interval_ms`
    /// - `ROTA_SCHEDULER_MAX_RETRIES` -> `scheduler.max_retries`
    /// - `ROTA_ADAPTIVE_UPDATE_INTERVAL_MS` -> `adaptive.update_interval_ms`
    /// - `ROTA_STREAMING_TARGET_LATENCY_MS` -> `streaming.target_latency_ms`
    /// - `ROTA_STREAMING_STALL_THRESHOLD_MS` -> `streaming.stall_threshold_ms`
    /// - `ROTA_MEMORY_BUDGET_MB` -> `memory.budget_mb`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("ROTA_SCHEDULER_TICK_INTERVAL_MS") {
            self.scheduler.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("ROTA_SCHEDULER_MAX_CONCURRENT_TASKS") {
            self.scheduler.max_concurrent_tasks = v;
        }
        if let Some(v) = env_parse("ROTA_SCHEDULER_MAX_RETRIES") {
            self.scheduler.max_retries = v;
        }
        if let Some(v) = env_parse("ROTA_ADAPTIVE_UPDATE_INTERVAL_MS") {
            self.adaptive.update_interval_ms = v;
        }
        if let Some(v) = env_parse("ROTA_ADAPTIVE_EMERGENCY_MIN_DWELL_MS") {
            self.adaptive.emergency_min_dwell_ms = v;
        }
        if let Some(v) = env_parse("ROTA_STREAMING_TARGET_LATENCY_MS") {
            self.streaming.target_latency_ms = v;
        }
        if let Some(v) = env_parse("ROTA_STREAMING_STALL_THRESHOLD_MS") {
            self.streaming.stall_threshold_ms = v;
        }
        if let Some(v) = env_parse("ROTA_STREAMING_WORKER_TIMEOUT_MS") {
            self.streaming.worker_timeout_ms = v;
        }
        if let Some(v) = env_parse("ROTA_MEMORY_BUDGET_MB") {
            self.memory.budget_mb = v;
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Runtime config loaded:");
        tracing::info!(
            "  scheduler:  tick={}ms, max_concurrent={}, max_retries={}",
            self.scheduler.tick_interval_ms,
            self.scheduler.max_concurrent_tasks,
            self.scheduler.max_retries
        );
        tracing::info!(
            "  adaptive:   update={}ms, chunk={}/{}/{}, emergency_dwell={}ms",
            self.adaptive.update_interval_ms,
            self.adaptive.base_chunk_size,
            self.adaptive.reduced_chunk_size,
            self.adaptive.minimal_chunk_size,
            self.adaptive.emergency_min_dwell_ms
        );
        tracing::info!(
            "  streaming:  target={}ms, chunk=[{}, {}], stall={}ms",
            self.streaming.target_latency_ms,
            self.streaming.min_chunk_size,
            self.streaming.max_chunk_size,
            self.streaming.stall_threshold_ms
        );
        tracing::info!(
            "  memory:     budget={}MB, window={}",
            self.memory.budget_mb,
            self.memory.sample_window
        );
    }
}
