use crate::error::ConfigurationError;
use crate::types::Priority;

use super::types::RuntimeConfig;

fn invalid(msg: impl Into<String>) -> ConfigurationError {
    ConfigurationError::Invalid(msg.into())
}

impl RuntimeConfig {
    /// Validate the config: ranges, orderings, and non-zero cadences.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.validate_scheduler()?;
        self.validate_adaptive()?;
        self.validate_streaming()?;
        self.validate_memory()?;
        Ok(())
    }

    fn validate_scheduler(&self) -> Result<(), ConfigurationError> {
        let s = &self.scheduler;
        if s.tick_interval_ms == 0 {
            return Err(invalid("scheduler.tick_interval_ms must be > 0"));
        }
        if s.max_concurrent_tasks == 0 {
            return Err(invalid("scheduler.max_concurrent_tasks must be > 0"));
        }
        for (name, factor) in [
            ("user_active_slice_factor", s.user_active_slice_factor),
            ("high_pressure_factor", s.high_pressure_factor),
            ("critical_pressure_factor", s.critical_pressure_factor),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(invalid(format!(
                    "scheduler.{name} must be in (0, 1], got {factor}"
                )));
            }
        }
        Ok(())
    }

    fn validate_adaptive(&self) -> Result<(), ConfigurationError> {
        let a = &self.adaptive;
        if a.update_interval_ms == 0 {
            return Err(invalid("adaptive.update_interval_ms must be > 0"));
        }
        for level in Priority::ALL {
            let weight = a.priority_weights.get(level);
            if !(weight > 0.0 && weight.is_finite()) {
                return Err(invalid(format!(
                    "adaptive.priority_weights.{level} must be > 0, got {weight}"
                )));
            }
            if a.time_slices_ms.get(level) == 0 {
                return Err(invalid(format!(
                    "adaptive.time_slices_ms.{level} must be > 0"
                )));
            }
        }
        if !(a.minimal_chunk_size <= a.reduced_chunk_size
            && a.reduced_chunk_size <= a.base_chunk_size)
        {
            return Err(invalid(
                "adaptive chunk sizes must satisfy minimal <= reduced <= base",
            ));
        }
        if !(a.minimal_yield_ms <= a.reduced_yield_ms && a.reduced_yield_ms <= a.base_yield_ms) {
            return Err(invalid(
                "adaptive yield intervals must satisfy minimal <= reduced <= base",
            ));
        }
        for (name, factor) in [
            ("reduced_slice_factor", a.reduced_slice_factor),
            ("minimal_slice_factor", a.minimal_slice_factor),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(invalid(format!(
                    "adaptive.{name} must be in (0, 1], got {factor}"
                )));
            }
        }
        Ok(())
    }

    fn validate_streaming(&self) -> Result<(), ConfigurationError> {
        let s = &self.streaming;
        if s.min_chunk_size == 0 {
            return Err(invalid("streaming.min_chunk_size must be > 0"));
        }
        if s.min_chunk_size > s.max_chunk_size {
            return Err(invalid(format!(
                "streaming.min_chunk_size ({}) exceeds max_chunk_size ({})",
                s.min_chunk_size, s.max_chunk_size
            )));
        }
        if s.shrink_divisor <= 1.0 {
            return Err(invalid("streaming.shrink_divisor must be > 1"));
        }
        if s.grow_multiplier <= 1.0 {
            return Err(invalid("streaming.grow_multiplier must be > 1"));
        }
        if s.min_buffer_size == 0 || s.min_buffer_size > s.buffer_size {
            return Err(invalid(
                "streaming buffer sizes must satisfy 0 < min_buffer_size <= buffer_size",
            ));
        }
        if s.target_latency_ms == 0 || s.stall_threshold_ms == 0 || s.worker_timeout_ms == 0 {
            return Err(invalid(
                "streaming latency, stall, and worker timeouts must be > 0",
            ));
        }
        Ok(())
    }

    fn validate_memory(&self) -> Result<(), ConfigurationError> {
        let m = &self.memory;
        if m.budget_mb <= 0.0 {
            return Err(invalid("memory.budget_mb must be > 0"));
        }
        if !(0.0 < m.warning_ratio && m.warning_ratio < m.high_ratio && m.high_ratio < m.critical_ratio)
        {
            return Err(invalid(
                "memory ratios must satisfy 0 < warning < high < critical",
            ));
        }
        if m.sample_window == 0 {
            return Err(invalid("memory.sample_window must be > 0"));
        }
        Ok(())
    }
}
