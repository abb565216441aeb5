//! Pass-through bound operators for exercising the planner without a
//! concrete platform.

use std::sync::Arc;
use std::time::Duration;

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::id::Epoch;
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
use polyplan_core::plan::OperatorKind;
use polyplan_core::platform::Platform;
use polyplan_estimator::{CostModel, InMemorySpecSource, SpecSource};

use crate::pattern::{OperatorPattern, SubplanPattern};
use crate::rule::{PlanTransformation, ReplacementSubplanFactory, RuleRegistry};

#[derive(Debug, Clone)]
pub struct MockOp {
    pub name: String,
    pub kind: &'static str,
    pub platform: Platform,
    pub inputs: usize,
    pub outputs: usize,
    pub channels: Vec<ChannelDescriptor>,
    pub epoch: Epoch,
}

impl ExecutionOperator for MockOp {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        self.kind
    }
    fn platform(&self) -> Platform {
        self.platform
    }
    fn epoch(&self) -> Epoch {
        self.epoch
    }
    fn num_inputs(&self) -> usize {
        self.inputs
    }
    fn num_outputs(&self) -> usize {
        self.outputs
    }
    fn supported_input_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        self.channels.clone()
    }
    fn supported_output_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        self.channels.clone()
    }
    fn copy(&self) -> Box<dyn ExecutionOperator> {
        Box::new(self.clone())
    }
    fn evaluate(
        &self,
        inputs: Vec<ChannelInstance>,
        mut outputs: Vec<ChannelInstance>,
        _ctx: &ExecutionContext,
        op_ctx: &OperatorContext,
    ) -> Result<Evaluation, EvaluationError> {
        let mut rows = Vec::new();
        for i in inputs {
            rows.extend(i.into_records()?);
        }
        let n = rows.len() as u64;
        if let Some(out) = outputs.first_mut() {
            out.accept_records(rows);
        }
        let (prepare, main) = op_ctx.lineage(Duration::ZERO, Duration::ZERO, n, &outputs);
        Ok(Evaluation {
            prepare,
            main,
            produced: outputs,
        })
    }
}

pub fn mock_rule(kind: OperatorKind, platform: Platform, channels: Vec<ChannelDescriptor>) -> PlanTransformation {
    PlanTransformation::new(
        format!("{}->{}", kind, platform),
        SubplanPattern::singleton(OperatorPattern::new(kind.name(), kind)),
        ReplacementSubplanFactory::of_single_operator(move |op, epoch| {
            Ok(Box::new(MockOp {
                name: op.name().to_string(),
                kind: kind.name(),
                platform,
                inputs: op.num_inputs(),
                outputs: op.num_outputs(),
                channels: channels.clone(),
                epoch,
            }) as Box<dyn ExecutionOperator>)
        }),
        platform,
    )
}

pub fn mock_registry(kinds: &[OperatorKind], platform: Platform) -> RuleRegistry {
    let channels = platform.capabilities().channels.to_vec();
    RuleRegistry::builder()
        .rules(kinds.iter().map(|k| mock_rule(*k, platform, channels.clone())))
        .build()
        .expect("mock rules are valid")
}

/// Fixed-cost main specs; everything else falls back.
pub fn spec_source(specs: &[(&str, f64)]) -> Arc<dyn SpecSource> {
    let mut src = InMemorySpecSource::new();
    for (key, ms) in specs {
        src.insert(*key, CostModel::linear(*ms, 0.0)).expect("valid model");
    }
    Arc::new(src)
}
