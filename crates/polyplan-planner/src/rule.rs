//! Plan transformations and the registry that holds them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use polyplan_core::id::{Epoch, RuleId};
use polyplan_core::operator::ExecutionOperator;
use polyplan_core::plan::Operator;
use polyplan_core::platform::Platform;

use crate::error::{MappingError, PatternError};
use crate::pattern::SubplanPattern;

/// `(operator index, slot)` inside a replacement.
pub type ReplacementSlot = (usize, usize);

/// Platform-bound operators standing in for one matched subplan.
///
/// `inputs[i]` is the slot fed by the match's i-th input boundary (declared
/// boundaries first, then broadcasts); `outputs[j]` produces the j-th output
/// boundary. Internal links must point forward in `operators`.
#[derive(Debug)]
pub struct ReplacementSubplan {
    pub operators: Vec<Box<dyn ExecutionOperator>>,
    pub links: Vec<(ReplacementSlot, ReplacementSlot)>,
    pub inputs: Vec<ReplacementSlot>,
    pub outputs: Vec<ReplacementSlot>,
}

impl ReplacementSubplan {
    /// A single operator whose slots map one-to-one onto the boundaries.
    pub fn single(op: Box<dyn ExecutionOperator>) -> Self {
        let inputs = (0..op.num_inputs()).map(|s| (0, s)).collect();
        let outputs = (0..op.num_outputs()).map(|s| (0, s)).collect();
        Self {
            operators: vec![op],
            links: Vec::new(),
            inputs,
            outputs,
        }
    }

    pub fn platforms(&self) -> BTreeSet<Platform> {
        self.operators.iter().map(|o| o.platform()).collect()
    }
}

impl Clone for ReplacementSubplan {
    fn clone(&self) -> Self {
        Self {
            operators: self.operators.iter().map(|o| o.copy()).collect(),
            links: self.links.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

type FactoryFn = dyn Fn(&[&Operator], Epoch) -> Result<ReplacementSubplan, String> + Send + Sync;

/// Pure function from matched operators (in pattern node order) and an
/// epoch to a replacement subplan.
#[derive(Clone)]
pub struct ReplacementSubplanFactory {
    f: Arc<FactoryFn>,
}

impl ReplacementSubplanFactory {
    pub fn new(
        f: impl Fn(&[&Operator], Epoch) -> Result<ReplacementSubplan, String> + Send + Sync + 'static,
    ) -> Self {
        Self { f: Arc::new(f) }
    }

    /// Factory for single-node patterns.
    pub fn of_single_operator(
        f: impl Fn(&Operator, Epoch) -> Result<Box<dyn ExecutionOperator>, String> + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |ops, epoch| match ops {
            [op] => f(op, epoch).map(ReplacementSubplan::single),
            _ => Err(format!("expected one matched operator, got {}", ops.len())),
        })
    }

    pub fn create(&self, ops: &[&Operator], epoch: Epoch) -> Result<ReplacementSubplan, String> {
        (self.f)(ops, epoch)
    }
}

impl fmt::Debug for ReplacementSubplanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReplacementSubplanFactory")
    }
}

/// Immutable `(pattern, factory, platform)` rule.
#[derive(Debug, Clone)]
pub struct PlanTransformation {
    pub name: String,
    pub pattern: SubplanPattern,
    pub factory: ReplacementSubplanFactory,
    pub platform: Platform,
}

impl PlanTransformation {
    pub fn new(
        name: impl Into<String>,
        pattern: SubplanPattern,
        factory: ReplacementSubplanFactory,
        platform: Platform,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            factory,
            platform,
        }
    }

    /// Run the factory and check the replacement against the match shape.
    pub fn replace(
        &self,
        ops: &[&Operator],
        boundary_inputs: usize,
        boundary_outputs: usize,
        epoch: Epoch,
    ) -> Result<ReplacementSubplan, MappingError> {
        let replacement = self.factory.create(ops, epoch).map_err(|reason| MappingError::Replacement {
            rule: self.name.clone(),
            operators: ops.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(", "),
            reason,
        })?;
        let arity = |direction: &'static str, expected: usize, got: usize| MappingError::ArityMismatch {
            rule: self.name.clone(),
            direction,
            expected,
            got,
        };
        if replacement.inputs.len() != boundary_inputs {
            return Err(arity("input", boundary_inputs, replacement.inputs.len()));
        }
        if replacement.outputs.len() != boundary_outputs {
            return Err(arity("output", boundary_outputs, replacement.outputs.len()));
        }
        let n = replacement.operators.len();
        let bad_link = replacement
            .links
            .iter()
            .any(|((from, _), (to, _))| from >= to || *to >= n);
        let bad_slot = replacement
            .inputs
            .iter()
            .chain(&replacement.outputs)
            .any(|(op, _)| *op >= n);
        if bad_link || bad_slot {
            return Err(MappingError::Replacement {
                rule: self.name.clone(),
                operators: ops.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(", "),
                reason: "replacement links must point forward to existing operators".into(),
            });
        }
        Ok(replacement)
    }
}

/// Process-wide rule set, built once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<PlanTransformation>,
}

impl RuleRegistry {
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder { rules: Vec::new() }
    }

    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &PlanTransformation)> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, r)| (RuleId::new(i as u64), r))
    }

    pub fn get(&self, id: RuleId) -> Option<&PlanTransformation> {
        self.rules.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub struct RuleRegistryBuilder {
    rules: Vec<PlanTransformation>,
}

impl RuleRegistryBuilder {
    pub fn rule(mut self, rule: PlanTransformation) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = PlanTransformation>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn build(self) -> Result<RuleRegistry, PatternError> {
        let mut names = BTreeSet::new();
        for rule in &self.rules {
            if !names.insert(rule.name.as_str()) {
                return Err(PatternError::DuplicateRule(rule.name.clone()));
            }
            if let Some(kind) = rule
                .pattern
                .kinds()
                .into_iter()
                .find(|k| !rule.platform.supports(*k))
            {
                return Err(PatternError::UnsupportedKind {
                    rule: rule.name.clone(),
                    platform: rule.platform,
                    kind,
                });
            }
            debug!(rule = %rule.name, platform = %rule.platform, nodes = rule.pattern.nodes().len(), "registered rule");
        }
        info!(rules = self.rules.len(), "rule registry ready");
        Ok(RuleRegistry { rules: self.rules })
    }
}
