//! The quality band.

use serde::{Deserialize, Serialize};

/// Inclusive `[low, high]` interval the measurement must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetBand {
    pub low: f64,
    pub high: f64,
}

impl TargetBand {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Dead-band test. Both edges are inside.
    pub fn contains(&self, y: f64) -> bool {
        self.low <= y && y <= self.high
    }

    /// Distance from `y` to the nearest band edge; 0 inside.
    pub fn distance(&self, y: f64) -> f64 {
        if y < self.low {
            self.low - y
        } else if y > self.high {
            y - self.high
        } else {
            0.0
        }
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

impl From<[f64; 2]> for TargetBand {
    fn from([low, high]: [f64; 2]) -> Self {
        Self { low, high }
    }
}
