// Running statistics for a single test
//
// Aggregates are maintained in O(1) per sample so snapshots never rescan the
// sample history:
// - mean/variance with Welford's online algorithm
// - min/max directly
// - sample rate from an incremental least-squares fit of arrival time
//   against sample index

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Incremental count/mean/variance/min/max accumulator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    sum_squared_delta: f64,
    min: f64,
    max: f64,
}

/// Derived statistics at one point in time
///
/// All fields are zero for an empty accumulator. `stdev` is the sample
/// (n - 1) standard deviation and is zero while `count <= 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: u64,
    pub mean: f64,
    pub peak: f64,
    pub low: f64,
    pub stdev: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one value into the aggregates
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.sum_squared_delta += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sample variance, zero while fewer than two values were seen
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.sum_squared_delta / (self.count - 1) as f64).max(0.0)
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            count: self.count,
            mean: self.mean,
            peak: self.max,
            low: self.min,
            stdev: self.variance().sqrt(),
        }
    }
}

/// Incremental estimate of the sample rate of a test
///
/// Fits `arrival = slope * index + intercept`; the rate is `1 / slope`.
/// Arrival times are taken relative to the first sample to keep the sums
/// small.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateEstimator {
    origin: Option<Duration>,
    n: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xy: f64,
    sum_xx: f64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, at: Duration) {
        let origin = *self.origin.get_or_insert(at);
        let x = self.n;
        let y = at.saturating_sub(origin).as_secs_f64();

        self.n += 1.0;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_xx += x * x;
    }

    /// Seconds per sample, if it can be determined
    pub fn slope(&self) -> Option<f64> {
        if self.n < 2.0 {
            return None;
        }
        let denominator = self.n * self.sum_xx - self.sum_x * self.sum_x;
        if denominator == 0.0 {
            return None;
        }
        Some((self.n * self.sum_xy - self.sum_x * self.sum_y) / denominator)
    }

    /// Samples per second, `None` with fewer than two samples or a
    /// non-positive slope (all samples in one read burst)
    pub fn rate_hz(&self) -> Option<f64> {
        match self.slope() {
            Some(slope) if slope > 0.0 => Some(1.0 / slope),
            _ => None,
        }
    }

    /// Duration implied by the sample count at the estimated rate
    pub fn duration_secs(&self) -> Option<f64> {
        self.rate_hz().map(|rate| self.n / rate)
    }
}
