//! Cardinality propagation over the logical plan.
//!
//! Sources with inline records have exact counts; text sources only know
//! what a hint tells them. Everything downstream derives its estimate from
//! its producers, and an unknown input keeps the output unknown.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use polyplan_core::config::EstimatorConfig;
use polyplan_core::error::PlanError;
use polyplan_core::id::OperatorId;
use polyplan_core::plan::{LogicalOp, OperatorPlan};
use polyplan_core::types::Record;

use crate::model::InputStatistics;

/// Source sizes supplied by the caller, keyed by source URL or operator name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardinalityHints {
    pub source_rows: BTreeMap<String, u64>,
}

impl CardinalityHints {
    pub fn with(mut self, source: impl Into<String>, rows: u64) -> Self {
        self.source_rows.insert(source.into(), rows);
        self
    }
}

/// Estimated statistics of every operator's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanStatistics {
    outputs: BTreeMap<OperatorId, InputStatistics>,
}

impl PlanStatistics {
    pub fn output(&self, id: OperatorId) -> InputStatistics {
        self.outputs.get(&id).copied().unwrap_or_default()
    }

    /// Statistics of `id`'s inputs in slot order, broadcasts included.
    pub fn inputs(&self, plan: &OperatorPlan, id: OperatorId) -> Vec<InputStatistics> {
        plan.incoming(id)
            .iter()
            .map(|e| self.output(e.from.operator))
            .collect()
    }
}

/// Fraction of rows a filter predicate is assumed to keep.
pub fn estimate_filter_selectivity(predicate: &str) -> f64 {
    if predicate.contains(" in @") {
        0.5
    } else if predicate.contains("!=") {
        0.9
    } else if predicate.contains("==") {
        0.1
    } else if predicate.contains('<') || predicate.contains('>') {
        0.33
    } else {
        0.5
    }
}

pub fn propagate_cardinalities(
    plan: &OperatorPlan,
    hints: &CardinalityHints,
    config: &EstimatorConfig,
) -> Result<PlanStatistics, PlanError> {
    let mut stats = PlanStatistics::default();
    for id in plan.topological_order()? {
        let op = plan.get(id)?;
        let inputs: Vec<InputStatistics> = plan
            .incoming(id)
            .iter()
            .filter(|e| !op.inputs()[e.to.slot].broadcast)
            .map(|e| stats.output(e.from.operator))
            .collect();
        let first = inputs.first().copied().unwrap_or_default();

        let out = match op.op() {
            LogicalOp::CollectionSource { records } => InputStatistics {
                cardinality: Some(records.len() as u64),
                avg_record_bytes: Some(average_bytes(records, config.default_record_bytes)),
            },
            LogicalOp::TextFileSource { url } => InputStatistics {
                cardinality: hints
                    .source_rows
                    .get(url)
                    .or_else(|| hints.source_rows.get(op.name()))
                    .copied(),
                avg_record_bytes: None,
            },
            LogicalOp::Filter { predicate } => InputStatistics {
                cardinality: first
                    .cardinality
                    .map(|n| (n as f64 * estimate_filter_selectivity(predicate)).ceil() as u64),
                ..first
            },
            LogicalOp::Map { .. } | LogicalOp::Project { .. } | LogicalOp::Sink { .. } => first,
            LogicalOp::Union => {
                let cardinality = inputs
                    .iter()
                    .map(|s| s.cardinality)
                    .sum::<Option<u64>>();
                InputStatistics {
                    cardinality,
                    avg_record_bytes: first.avg_record_bytes,
                }
            }
        };
        stats.outputs.insert(id, out);
    }
    Ok(stats)
}

fn average_bytes(records: &[Record], fallback: u64) -> u64 {
    if records.is_empty() {
        return fallback;
    }
    let total: u64 = records.iter().map(Record::approx_bytes).sum();
    (total / records.len() as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyplan_core::types::Scalar;

    fn rows(n: i64) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("i", Scalar::I64(i))).collect()
    }

    #[test]
    fn selectivity_follows_operator() {
        assert_eq!(estimate_filter_selectivity("a == 1"), 0.1);
        assert_eq!(estimate_filter_selectivity("a != 1"), 0.9);
        assert_eq!(estimate_filter_selectivity("a >= 1"), 0.33);
        assert_eq!(estimate_filter_selectivity("a in @allowed"), 0.5);
    }

    #[test]
    fn filter_and_union_derive_from_producers() {
        let mut plan = OperatorPlan::new();
        let a = plan.add(LogicalOp::CollectionSource { records: rows(100) });
        let b = plan.add(LogicalOp::CollectionSource { records: rows(20) });
        let f = plan.add(LogicalOp::Filter {
            predicate: "i == 3".into(),
        });
        let u = plan.add(LogicalOp::Union);
        let s = plan.add(LogicalOp::Sink {
            destination: "memory://out".into(),
        });
        plan.chain(a, f).unwrap();
        plan.connect(f, 0, u, 0).unwrap();
        plan.connect(b, 0, u, 1).unwrap();
        plan.chain(u, s).unwrap();

        let stats = propagate_cardinalities(&plan, &CardinalityHints::default(), &EstimatorConfig::default()).unwrap();
        assert_eq!(stats.output(f).cardinality, Some(10));
        assert_eq!(stats.output(u).cardinality, Some(30));
        assert_eq!(stats.inputs(&plan, s)[0].cardinality, Some(30));
    }

    #[test]
    fn text_source_without_hint_is_unknown() {
        let mut plan = OperatorPlan::new();
        let t = plan.add(LogicalOp::TextFileSource {
            url: "file:///tmp/x.txt".into(),
        });
        let s = plan.add(LogicalOp::Sink {
            destination: "memory://out".into(),
        });
        plan.chain(t, s).unwrap();
        let cfg = EstimatorConfig::default();
        let none = propagate_cardinalities(&plan, &CardinalityHints::default(), &cfg).unwrap();
        assert_eq!(none.output(s).cardinality, None);

        let hinted = CardinalityHints::default().with("file:///tmp/x.txt", 42);
        let some = propagate_cardinalities(&plan, &hinted, &cfg).unwrap();
        assert_eq!(some.output(s).cardinality, Some(42));
    }
}
