use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduling class. Lower numeric value = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Always served first, never fairness-scored.
    Critical = 0,
    /// Direct reactions to user input.
    High = 1,
    Normal = 2,
    Low = 3,
    /// Speculative work; yields to the user.
    Background = 4,
}

impl Priority {
    /// All levels, highest first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// One level lower, saturating at `Background`.
    pub fn demoted(self) -> Self {
        match self {
            Priority::Critical => Priority::High,
            Priority::High => Priority::Normal,
            Priority::Normal => Priority::Low,
            Priority::Low | Priority::Background => Priority::Background,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per priority level, addressable by [`Priority`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerLevel<T> {
    pub critical: T,
    pub high: T,
    pub normal: T,
    pub low: T,
    pub background: T,
}

impl<T: Copy> PerLevel<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            critical: value,
            high: value,
            normal: value,
            low: value,
            background: value,
        }
    }

    pub fn get(&self, priority: Priority) -> T {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
            Priority::Background => self.background,
        }
    }

    pub fn set(&mut self, priority: Priority, value: T) {
        match priority {
            Priority::Critical => self.critical = value,
            Priority::High => self.high = value,
            Priority::Normal => self.normal = value,
            Priority::Low => self.low = value,
            Priority::Background => self.background = value,
        }
    }

    /// Apply `f` to every level, producing a new table.
    pub fn map<U: Copy>(&self, mut f: impl FnMut(Priority, T) -> U) -> PerLevel<U> {
        PerLevel {
            critical: f(Priority::Critical, self.critical),
            high: f(Priority::High, self.high),
            normal: f(Priority::Normal, self.normal),
            low: f(Priority::Low, self.low),
            background: f(Priority::Background, self.background),
        }
    }
}

/// Discrete memory pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    #[default]
    Normal,
    Warning,
    High,
    Critical,
}

impl PressureLevel {
    /// High and critical pressure push backpressure into the loop.
    pub fn is_backpressure(self) -> bool {
        matches!(self, PressureLevel::High | PressureLevel::Critical)
    }
}

/// Coarse processing mode chosen by the adaptive controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Normal,
    Reduced,
    Minimal,
}
