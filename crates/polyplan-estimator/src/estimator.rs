//! The load profile estimator.
//!
//! `estimate` evaluates the declared model for a key and widens the result
//! when the key or the input cardinality is unknown. Realized costs from
//! sealed lineage are folded in per key as a running mean of
//! `realized / declared` time ratios; the more samples a key has, the more
//! the estimate follows them and the narrower its interval gets.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use polyplan_core::config::EstimatorConfig;
use polyplan_core::lineage::{LineageGraph, LineagePhase, RealizedCost};
use polyplan_core::load::{Interval, LoadProfile};

use crate::model::{CostModel, InputStatistics};
use crate::spec::SpecSource;

/// Per-row time assumed for keys nobody declared.
const FALLBACK_PER_ROW_MS: f64 = 0.001;

/// Ratios outside this band are treated as measurement noise and clamped.
const RATIO_BOUNDS: (f64, f64) = (1e-3, 1e3);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Observations {
    samples: u64,
    ratio_sum: f64,
}

impl Observations {
    fn mean_ratio(&self) -> f64 {
        if self.samples == 0 {
            1.0
        } else {
            self.ratio_sum / self.samples as f64
        }
    }
}

pub struct LoadProfileEstimator {
    source: Arc<dyn SpecSource>,
    config: EstimatorConfig,
    observations: BTreeMap<String, Observations>,
}

impl std::fmt::Debug for LoadProfileEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadProfileEstimator")
            .field("config", &self.config)
            .field("calibrated_keys", &self.observations.len())
            .finish()
    }
}

impl LoadProfileEstimator {
    pub fn new(source: Arc<dyn SpecSource>, config: EstimatorConfig) -> Self {
        Self {
            source,
            config,
            observations: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Number of realized samples absorbed for `key`.
    pub fn samples(&self, key: &str) -> u64 {
        self.observations.get(key).map_or(0, |o| o.samples)
    }

    fn model(&self, key: &str) -> Option<CostModel> {
        match self.source.lookup(key) {
            Ok(model) => model,
            Err(e) => {
                warn!(key, error = %e, "spec lookup failed; using fallback model");
                None
            }
        }
    }

    /// Estimate the cost of `key` for the given inputs. Never fails.
    pub fn estimate(&self, key: &str, inputs: &[InputStatistics]) -> LoadProfile {
        let cfg = &self.config;
        let mut unknown = false;
        let mut rows = 0.0;
        let mut bytes = 0.0;
        for input in inputs {
            let n = input.cardinality.unwrap_or_else(|| {
                unknown = true;
                cfg.default_cardinality
            }) as f64;
            rows += n;
            bytes += n * input.avg_record_bytes.unwrap_or(cfg.default_record_bytes) as f64;
        }

        let model = self.model(key);
        if model.is_none() {
            unknown = true;
        }
        let model = model.unwrap_or_else(|| CostModel::linear(0.0, FALLBACK_PER_ROW_MS));

        let obs = self.observations.get(key).copied().unwrap_or_default();
        let w = obs.samples as f64 / (obs.samples as f64 + cfg.prior_weight);
        let scale = (1.0 - w) + w * obs.mean_ratio();

        let base = if unknown {
            cfg.min_confidence
        } else {
            cfg.declared_confidence
        };
        let confidence = (base + (1.0 - base) * w).clamp(0.0, 1.0);
        let relative = cfg.spread * (1.0 - confidence);

        let time = model.time_ms(rows, bytes) * scale;
        let memory = model.memory_bytes(rows);
        let network = model.network_bytes(bytes);
        trace!(key, rows, time, confidence, "estimated load profile");

        LoadProfile {
            time_ms: Interval::around(time, time * relative),
            memory_bytes: Interval::around(memory, memory * relative),
            network_bytes: Interval::around(network, network * relative),
            confidence,
        }
    }

    /// Rows and bytes a realized sample is compared at, matching how the
    /// estimate for the same key is sized: prepare phases are estimated with
    /// no inputs, and operators without inputs by what they emit.
    fn sizing(&self, phase: LineagePhase, realized: &RealizedCost) -> (f64, f64) {
        match phase {
            LineagePhase::Prepare => (0.0, 0.0),
            _ if realized.input_cardinality == 0 => {
                (realized.output_cardinality as f64, realized.output_bytes as f64)
            }
            _ => {
                let rows = realized.input_cardinality as f64;
                (rows, rows * self.config.default_record_bytes as f64)
            }
        }
    }

    /// Absorb realized costs from a sealed lineage graph.
    ///
    /// Returns the number of samples recorded. Nodes without a spec key or
    /// realized cost, and keys whose declared time is zero, are skipped.
    pub fn calibrate(&mut self, lineage: &LineageGraph) -> usize {
        let mut absorbed = 0;
        for node in lineage.nodes() {
            let (Some(key), Some(realized)) = (&node.spec_key, node.realized) else {
                continue;
            };
            let (rows, bytes) = self.sizing(node.phase, &realized);
            let declared = self
                .model(key)
                .unwrap_or_else(|| CostModel::linear(0.0, FALLBACK_PER_ROW_MS))
                .time_ms(rows, bytes);
            if declared <= f64::EPSILON {
                trace!(key, "skipping calibration sample with zero declared time");
                continue;
            }
            let ratio = (realized.elapsed_ms / declared).clamp(RATIO_BOUNDS.0, RATIO_BOUNDS.1);
            let entry = self.observations.entry(key.clone()).or_default();
            entry.samples += 1;
            entry.ratio_sum += ratio;
            absorbed += 1;
        }
        debug!(
            run = %lineage.run_id(),
            absorbed,
            keys = self.observations.len(),
            "calibrated estimator from lineage"
        );
        absorbed
    }
}
