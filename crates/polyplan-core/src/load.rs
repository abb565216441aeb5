//! Load profiles: estimated or realized resource consumption with an
//! uncertainty interval per resource.

use serde::{Deserialize, Serialize};
use std::ops::Add;

use crate::config::CostWeights;

/// Closed interval `[lower, upper]`, never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn point(v: f64) -> Self {
        let v = v.max(0.0);
        Self { lower: v, upper: v }
    }

    pub fn around(expected: f64, half_width: f64) -> Self {
        let expected = expected.max(0.0);
        let half_width = half_width.abs();
        Self {
            lower: (expected - half_width).max(0.0),
            upper: expected + half_width,
        }
    }

    pub fn expected(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval {
            lower: self.lower + rhs.lower,
            upper: self.upper + rhs.upper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub time_ms: Interval,
    pub memory_bytes: Interval,
    pub network_bytes: Interval,
    /// In `[0, 1]`; higher means the interval is trusted more.
    pub confidence: f64,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self::zero()
    }
}

impl LoadProfile {
    /// The neutral element: no cost, full confidence.
    pub fn zero() -> Self {
        Self {
            time_ms: Interval::point(0.0),
            memory_bytes: Interval::point(0.0),
            network_bytes: Interval::point(0.0),
            confidence: 1.0,
        }
    }

    /// Scalar cost used for plan selection.
    ///
    /// Lower confidence inflates the expected value so that, at equal
    /// expectations, better-calibrated estimates win.
    pub fn cost(&self, weights: &CostWeights) -> f64 {
        let expected = self.time_ms.expected() * weights.time_ms
            + self.memory_bytes.expected() * weights.memory_bytes
            + self.network_bytes.expected() * weights.network_bytes;
        expected * (1.0 + weights.uncertainty_penalty * (1.0 - self.confidence.clamp(0.0, 1.0)))
    }
}

impl Add for LoadProfile {
    type Output = LoadProfile;

    fn add(self, rhs: LoadProfile) -> LoadProfile {
        LoadProfile {
            time_ms: self.time_ms + rhs.time_ms,
            memory_bytes: self.memory_bytes + rhs.memory_bytes,
            network_bytes: self.network_bytes + rhs.network_bytes,
            confidence: self.confidence.min(rhs.confidence),
        }
    }
}
