use std::collections::VecDeque;

/// Rolling mean over the last `window` usage samples.
#[derive(Debug, Clone)]
pub struct RollingUsage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl RollingUsage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    /// Add a sample and return the new average.
    pub fn push(&mut self, usage_mb: f64) -> f64 {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(usage_mb);
        self.sum += usage_mb;
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
