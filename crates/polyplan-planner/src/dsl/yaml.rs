//! YAML pipelines -> `OperatorPlan`.
//!
//! Steps chain to the previous step unless they name their `inputs`;
//! `broadcasts` attaches named side inputs. Example:
//! ```yaml
//! config:
//!   platform_priority: [local, distributed]
//! hints:
//!   file:///data/events.txt: 100000
//! steps:
//!   - op: text
//!     id: events
//!     url: "file:///data/events.txt"
//!   - op: source
//!     id: allowed
//!     records: [{ line: "a" }, { line: "b" }]
//!   - op: filter
//!     inputs: [events]
//!     predicate: "line in @allowed"
//!     broadcasts: { allowed: allowed }
//!   - op: sink
//!     destination: "memory://matches"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use polyplan_core::config::{parse_platform_list, EngineConfig};
use polyplan_core::error::PlanError;
use polyplan_core::id::OperatorId;
use polyplan_core::plan::{LogicalOp, OperatorPlan};
use polyplan_core::types::Record;
use polyplan_estimator::CardinalityHints;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("cannot parse pipeline: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid pipeline: {0}")]
    Invalid(String),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub config: Option<PipelineConfig>,
    #[serde(default)]
    pub hints: BTreeMap<String, u64>,
    pub steps: Vec<PipelineStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    /// broadcast name -> producing step id
    #[serde(default)]
    pub broadcasts: BTreeMap<String, String>,
    #[serde(flatten)]
    pub step: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum Step {
    #[serde(rename = "source")]
    Source { records: Vec<serde_json::Value> },

    #[serde(rename = "text")]
    Text { url: String },

    #[serde(rename = "filter")]
    Filter { predicate: String },

    #[serde(rename = "map")]
    Map { expr: String },

    #[serde(rename = "project")]
    Project { columns: Vec<String> },

    #[serde(rename = "union")]
    Union,

    #[serde(rename = "sink")]
    Sink { destination: String },
}

impl Step {
    fn into_logical(self) -> LogicalOp {
        match self {
            Step::Source { records } => LogicalOp::CollectionSource {
                records: records.iter().map(Record::from_json).collect(),
            },
            Step::Text { url } => LogicalOp::TextFileSource { url },
            Step::Filter { predicate } => LogicalOp::Filter { predicate },
            Step::Map { expr } => LogicalOp::Map { expr },
            Step::Project { columns } => LogicalOp::Project { columns },
            Step::Union => LogicalOp::Union,
            Step::Sink { destination } => LogicalOp::Sink { destination },
        }
    }
}

/// Pipeline-level overrides applied on top of the environment defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub exhaustive_candidate_limit: Option<usize>,
    pub platform_priority: Option<Vec<String>>,
    pub uncertainty_penalty: Option<f64>,
    pub default_cardinality: Option<u64>,
    pub parallelism: Option<usize>,
    pub lineage_dir: Option<String>,
}

impl PipelineConfig {
    pub fn apply(&self, cfg: &mut EngineConfig) -> Result<(), DslError> {
        if let Some(v) = self.exhaustive_candidate_limit {
            cfg.optimizer.exhaustive_candidate_limit = v;
        }
        if let Some(names) = &self.platform_priority {
            cfg.optimizer.platform_priority =
                parse_platform_list(&names.join(",")).map_err(|e| DslError::Invalid(e.to_string()))?;
        }
        if let Some(v) = self.uncertainty_penalty {
            cfg.optimizer.cost_weights.uncertainty_penalty = v;
        }
        if let Some(v) = self.default_cardinality {
            cfg.estimator.default_cardinality = v;
        }
        if let Some(v) = self.parallelism {
            cfg.distributed_parallelism = v;
        }
        if let Some(dir) = &self.lineage_dir {
            cfg.lineage_dir = Some(dir.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub plan: OperatorPlan,
    pub config: PipelineConfig,
    pub hints: CardinalityHints,
}

pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<ParsedPipeline, DslError> {
    let doc: Pipeline = serde_yaml::from_str(yaml_src)?;
    if doc.steps.is_empty() {
        return Err(DslError::Invalid("pipeline has no steps".into()));
    }

    let mut plan = OperatorPlan::new();
    let mut ids: BTreeMap<String, OperatorId> = BTreeMap::new();
    let mut previous: Option<OperatorId> = None;
    let lookup = |ids: &BTreeMap<String, OperatorId>, name: &str| {
        ids.get(name)
            .copied()
            .ok_or_else(|| DslError::Invalid(format!("unknown step '{name}'")))
    };

    for (i, s) in doc.steps.into_iter().enumerate() {
        let op = s.step.into_logical();
        let kind = op.kind();
        let name = s.id.clone().unwrap_or_else(|| kind.name().to_string());
        let id = plan.add_named(name, op);

        let inputs: Vec<OperatorId> = if !s.inputs.is_empty() {
            s.inputs
                .iter()
                .map(|n| lookup(&ids, n))
                .collect::<Result<_, _>>()?
        } else if kind.num_inputs() == 1 {
            let prev = previous.ok_or_else(|| {
                DslError::Invalid(format!("step {i} ({kind}) needs an input but nothing precedes it"))
            })?;
            vec![prev]
        } else {
            Vec::new()
        };
        if inputs.len() != kind.num_inputs() {
            return Err(DslError::Invalid(format!(
                "step {i} ({kind}) takes {} input(s), got {}",
                kind.num_inputs(),
                inputs.len()
            )));
        }
        for (slot, from) in inputs.into_iter().enumerate() {
            plan.connect(from, 0, id, slot)?;
        }
        for (bc_name, from) in &s.broadcasts {
            let from = lookup(&ids, from)?;
            let slot = plan.add_broadcast(id, bc_name.clone())?;
            plan.connect(from, 0, id, slot)?;
        }

        if let Some(step_id) = s.id {
            if ids.insert(step_id.clone(), id).is_some() {
                return Err(DslError::Invalid(format!("duplicate step id '{step_id}'")));
            }
        }
        previous = Some(id);
    }

    plan.validate()?;
    Ok(ParsedPipeline {
        plan,
        config: doc.config.unwrap_or_default(),
        hints: CardinalityHints {
            source_rows: doc.hints,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyplan_core::platform::Platform;

    #[test]
    fn linear_pipeline_chains_steps() {
        let src = r#"
steps:
  - op: source
    records: [{ a: 1 }, { a: 5 }]
  - op: filter
    predicate: "a > 2"
  - op: sink
    destination: "memory://out"
"#;
        let parsed = parse_yaml_pipeline(src).unwrap();
        assert_eq!(parsed.plan.len(), 3);
        assert_eq!(parsed.plan.edges().len(), 2);
        assert_eq!(parsed.plan.sinks().next().map(|s| s.name()), Some("sink"));
    }

    #[test]
    fn union_and_broadcast_reference_ids() {
        let src = r#"
config:
  platform_priority: [distributed, local]
  parallelism: 3
hints:
  "file:///tmp/a.txt": 10
steps:
  - { op: text, id: a, url: "file:///tmp/a.txt" }
  - { op: source, id: b, records: [{ line: "x" }] }
  - { op: union, id: u, inputs: [a, b] }
  - { op: filter, predicate: "line in @keep", broadcasts: { keep: b } }
  - { op: sink, destination: "memory://out" }
"#;
        let parsed = parse_yaml_pipeline(src).unwrap();
        assert_eq!(parsed.plan.len(), 5);
        let filter = &parsed.plan.operators()[3];
        assert_eq!(filter.broadcasts().count(), 1);
        assert_eq!(parsed.hints.source_rows.get("file:///tmp/a.txt"), Some(&10));

        let mut cfg = EngineConfig::default();
        parsed.config.apply(&mut cfg).unwrap();
        assert_eq!(cfg.optimizer.platform_priority, vec![Platform::Distributed, Platform::Local]);
        assert_eq!(cfg.distributed_parallelism, 3);
    }

    #[test]
    fn unknown_reference_and_missing_input_fail() {
        let bad_ref = "steps:\n  - { op: union, inputs: [x, y] }\n";
        assert!(matches!(parse_yaml_pipeline(bad_ref), Err(DslError::Invalid(_))));
        let no_input = "steps:\n  - { op: filter, predicate: \"a > 1\" }\n";
        assert!(matches!(parse_yaml_pipeline(no_input), Err(DslError::Invalid(_))));
    }
}
