//! Cost-model descriptors and the statistics they are evaluated against.

use serde::{Deserialize, Serialize};

use crate::error::{EstimatorError, Result};

/// What the estimator knows about one input of an operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputStatistics {
    /// `None` when no source hint reaches this input.
    pub cardinality: Option<u64>,
    pub avg_record_bytes: Option<u64>,
}

impl InputStatistics {
    pub fn known(cardinality: u64, avg_record_bytes: u64) -> Self {
        Self {
            cardinality: Some(cardinality),
            avg_record_bytes: Some(avg_record_bytes),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// One (rows, milliseconds) calibration point of a piecewise model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub rows: u64,
    pub ms: f64,
}

/// Declared cost of one specification key.
///
/// ```yaml
/// local.filter.main:
///   model: linear
///   per_row_ms: 0.0004
///   memory_bytes_per_row: 0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CostModel {
    Linear {
        #[serde(default)]
        fixed_ms: f64,
        #[serde(default)]
        per_row_ms: f64,
        #[serde(default)]
        per_kb_ms: f64,
        #[serde(default)]
        memory_bytes_per_row: f64,
        /// Fraction of input bytes that cross the network.
        #[serde(default)]
        network_ratio: f64,
    },
    /// Linear interpolation between breakpoints sorted by `rows`;
    /// the last segment is extrapolated.
    Piecewise {
        points: Vec<Breakpoint>,
        #[serde(default)]
        memory_bytes_per_row: f64,
        #[serde(default)]
        network_ratio: f64,
    },
}

impl CostModel {
    pub fn linear(fixed_ms: f64, per_row_ms: f64) -> Self {
        CostModel::Linear {
            fixed_ms,
            per_row_ms,
            per_kb_ms: 0.0,
            memory_bytes_per_row: 0.0,
            network_ratio: 0.0,
        }
    }

    /// Reject models that would yield negative or non-finite costs.
    pub fn validate(&self, key: &str) -> Result<()> {
        let invalid = |reason: &str| EstimatorError::InvalidModel {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        match self {
            CostModel::Linear {
                fixed_ms,
                per_row_ms,
                per_kb_ms,
                memory_bytes_per_row,
                network_ratio,
            } => {
                if ![*fixed_ms, *per_row_ms, *per_kb_ms, *memory_bytes_per_row, *network_ratio]
                    .into_iter()
                    .all(non_negative)
                {
                    return Err(invalid("coefficients must be finite and >= 0"));
                }
            }
            CostModel::Piecewise {
                points,
                memory_bytes_per_row,
                network_ratio,
            } => {
                if points.is_empty() {
                    return Err(invalid("piecewise model needs at least one point"));
                }
                if points.windows(2).any(|w| w[0].rows >= w[1].rows) {
                    return Err(invalid("breakpoints must be strictly increasing in rows"));
                }
                if !points.iter().all(|p| non_negative(p.ms))
                    || !non_negative(*memory_bytes_per_row)
                    || !non_negative(*network_ratio)
                {
                    return Err(invalid("values must be finite and >= 0"));
                }
            }
        }
        Ok(())
    }

    pub fn time_ms(&self, rows: f64, bytes: f64) -> f64 {
        match self {
            CostModel::Linear {
                fixed_ms,
                per_row_ms,
                per_kb_ms,
                ..
            } => fixed_ms + per_row_ms * rows + per_kb_ms * bytes / 1024.0,
            CostModel::Piecewise { points, .. } => interpolate(points, rows),
        }
    }

    pub fn memory_bytes(&self, rows: f64) -> f64 {
        match self {
            CostModel::Linear {
                memory_bytes_per_row,
                ..
            }
            | CostModel::Piecewise {
                memory_bytes_per_row,
                ..
            } => memory_bytes_per_row * rows,
        }
    }

    pub fn network_bytes(&self, bytes: f64) -> f64 {
        match self {
            CostModel::Linear { network_ratio, .. } | CostModel::Piecewise { network_ratio, .. } => {
                network_ratio * bytes
            }
        }
    }
}

fn interpolate(points: &[Breakpoint], rows: f64) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0.0,
    };
    if points.len() == 1 || rows <= first.rows as f64 {
        return first.ms;
    }
    let segment = points
        .windows(2)
        .find(|w| rows <= w[1].rows as f64)
        .unwrap_or(&points[points.len() - 2..]);
    let (a, b) = (segment[0], segment[1]);
    let slope = (b.ms - a.ms) / (b.rows - a.rows) as f64;
    let v = a.ms + slope * (rows - a.rows as f64);
    let v = if rows > last.rows as f64 { v.max(last.ms) } else { v };
    v.max(0.0)
}
