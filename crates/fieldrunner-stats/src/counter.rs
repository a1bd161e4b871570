//! Single-pass descriptive statistics.

use serde::{Deserialize, Serialize};

/// Stat names in their default table order.
pub const STAT_HEADERS: [&str; 6] = ["n", "sum", "avg", "min", "max", "sd"];

/// Streaming counter for n, sum, min, max, mean and sample standard deviation.
///
/// Variance uses the shifted-data algorithm anchored at the first observed
/// value, so large offsets do not cancel catastrophically.
#[derive(Debug, Clone, PartialEq)]
pub struct StatCounter {
    n: u64,
    sum: f64,
    min: f64,
    max: f64,
    shift: f64,
    ex: f64,
    ex2: f64,
}

impl Default for StatCounter {
    fn default() -> Self {
        Self {
            n: 0,
            sum: 0.0,
            min: 1e100,
            max: -1e100,
            shift: 0.0,
            ex: 0.0,
            ex2: 0.0,
        }
    }
}

/// Snapshot of a [`StatCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    pub n: f64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sd: f64,
}

impl StatSummary {
    /// Look up a stat by its script-facing name.
    pub fn get(&self, item: &str) -> Option<f64> {
        match item {
            "n" => Some(self.n),
            "sum" => Some(self.sum),
            "avg" => Some(self.avg),
            "min" => Some(self.min),
            "max" => Some(self.max),
            "sd" => Some(self.sd),
            _ => None,
        }
    }
}

impl StatCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation. NaN is ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        if self.n == 0 {
            self.shift = value;
        }
        self.n += 1;
        self.sum += value;
        let d = value - self.shift;
        self.ex += d;
        self.ex2 += d * d;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn summary(&self) -> StatSummary {
        let n = self.n as f64;
        let sd = if self.n > 1 {
            ((self.ex2 - (self.ex * self.ex) / n) / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        StatSummary {
            n,
            sum: self.sum,
            avg: self.sum / n,
            min: self.min,
            max: self.max,
            sd,
        }
    }
}
