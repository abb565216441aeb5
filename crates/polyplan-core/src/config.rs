//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub optimizer: OptimizerConfig,
    pub estimator: EstimatorConfig,

    /// Partition count used by the distributed platform.
    pub distributed_parallelism: usize,

    /// Optional directory where sealed lineage graphs are persisted.
    pub lineage_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            estimator: EstimatorConfig::default(),
            distributed_parallelism: 4,
            lineage_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Above this many candidates the optimizer switches from
    /// branch-and-bound to the greedy heuristic.
    pub exhaustive_candidate_limit: usize,

    /// Tie-break order: earlier platforms win equal-cost selections.
    pub platform_priority: Vec<Platform>,

    pub cost_weights: CostWeights,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            exhaustive_candidate_limit: 64,
            platform_priority: Platform::ALL.to_vec(),
            cost_weights: CostWeights::default(),
        }
    }
}

impl OptimizerConfig {
    /// Position in the priority list; unlisted platforms rank last.
    pub fn platform_rank(&self, platform: Platform) -> usize {
        self.platform_priority
            .iter()
            .position(|p| *p == platform)
            .unwrap_or(self.platform_priority.len())
    }
}

/// Weights that fold a `LoadProfile` into one comparable number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub time_ms: f64,
    pub memory_bytes: f64,
    pub network_bytes: f64,
    /// Relative inflation applied at zero confidence.
    pub uncertainty_penalty: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            time_ms: 1.0,
            memory_bytes: 0.0,
            network_bytes: 0.0,
            uncertainty_penalty: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Cardinality assumed when a source gives no hint.
    pub default_cardinality: u64,
    pub default_record_bytes: u64,

    /// Pseudo-sample count of the declared model when blending in observations.
    pub prior_weight: f64,

    /// Confidence of a declared model with known inputs and no observations.
    pub declared_confidence: f64,

    /// Confidence used when the key or the input cardinality is unknown.
    pub min_confidence: f64,

    /// Interval half-width at zero confidence, relative to the expectation.
    /// Must lie in `[0, 1]` so the lower bound never clamps at zero.
    pub spread: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            default_cardinality: 1_000,
            default_record_bytes: 64,
            prior_weight: 8.0,
            declared_confidence: 0.5,
            min_confidence: 0.05,
            spread: 1.0,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `POLYPLAN_EXHAUSTIVE_LIMIT`: candidate count above which greedy is used
    /// - `POLYPLAN_PLATFORM_PRIORITY`: comma-separated platform names
    /// - `POLYPLAN_UNCERTAINTY_PENALTY`: relative penalty at zero confidence
    /// - `POLYPLAN_DEFAULT_CARDINALITY`: cardinality for unknown sources
    /// - `POLYPLAN_PRIOR_WEIGHT`: calibration prior weight
    /// - `POLYPLAN_PARALLELISM`: distributed partition count
    /// - `POLYPLAN_LINEAGE_DIR`: lineage output directory
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("POLYPLAN_EXHAUSTIVE_LIMIT") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.optimizer.exhaustive_candidate_limit = v;
            }
        }

        if let Ok(s) = std::env::var("POLYPLAN_PLATFORM_PRIORITY") {
            if let Ok(v) = parse_platform_list(&s) {
                cfg.optimizer.platform_priority = v;
            }
        }

        if let Ok(s) = std::env::var("POLYPLAN_UNCERTAINTY_PENALTY") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.optimizer.cost_weights.uncertainty_penalty = v;
            }
        }

        if let Ok(s) = std::env::var("POLYPLAN_DEFAULT_CARDINALITY") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.estimator.default_cardinality = v;
            }
        }

        if let Ok(s) = std::env::var("POLYPLAN_PRIOR_WEIGHT") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.estimator.prior_weight = v;
            }
        }

        if let Ok(s) = std::env::var("POLYPLAN_PARALLELISM") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.distributed_parallelism = v;
            }
        }

        if let Ok(s) = std::env::var("POLYPLAN_LINEAGE_DIR") {
            cfg.lineage_dir = Some(s);
        }

        cfg
    }

    /// Reject settings the optimizer/estimator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.distributed_parallelism == 0 {
            return Err(Error::Config("distributed_parallelism must be > 0".into()));
        }
        if self.estimator.prior_weight <= 0.0 {
            return Err(Error::Config("estimator.prior_weight must be > 0".into()));
        }
        let e = &self.estimator;
        if !(0.0..=1.0).contains(&e.spread) {
            return Err(Error::Config(format!("estimator.spread must be within [0, 1], got {}", e.spread)));
        }
        if !(0.0..=1.0).contains(&e.min_confidence)
            || !(0.0..=1.0).contains(&e.declared_confidence)
            || e.min_confidence > e.declared_confidence
        {
            return Err(Error::Config(
                "confidences must satisfy 0 <= min_confidence <= declared_confidence <= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parse "local, distributed" into platforms.
pub fn parse_platform_list(s: &str) -> Result<Vec<Platform>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::parse::<Platform>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ranks_follow_declaration_order() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.platform_rank(Platform::Local), 0);
        assert_eq!(cfg.platform_rank(Platform::Distributed), 1);
    }

    #[test]
    fn platform_list_parses_and_rejects_unknowns() {
        assert_eq!(
            parse_platform_list("distributed, local").unwrap(),
            vec![Platform::Distributed, Platform::Local]
        );
        assert!(parse_platform_list("local,quantum").is_err());
    }

    #[test]
    fn zero_parallelism_is_invalid() {
        let mut cfg = EngineConfig::default();
        cfg.validate().unwrap();
        cfg.distributed_parallelism = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn spread_outside_unit_range_is_invalid() {
        let mut cfg = EngineConfig::default();
        cfg.estimator.spread = 0.0;
        cfg.validate().unwrap();
        cfg.estimator.spread = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("spread"), "{err}");
        cfg.estimator.spread = -0.1;
        assert!(cfg.validate().is_err());
        cfg.estimator.spread = f64::NAN;
        assert!(cfg.validate().is_err());
    }
}
