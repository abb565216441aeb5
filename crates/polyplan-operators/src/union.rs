//! Bag union of two inputs; rows of the first input come first.

use std::time::{Duration, Instant};

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};

use crate::bound::{bound_identity, expect_inputs, fill_output, Binding};

#[derive(Debug, Clone)]
pub struct Union {
    pub binding: Binding,
}

impl Union {
    pub fn new(binding: Binding) -> Self {
        Self { binding }
    }
}

impl ExecutionOperator for Union {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "union"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn supported_input_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        self.binding.input_channels()
    }

    fn supported_output_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        self.binding.output_channels()
    }

    fn evaluate(
        &self,
        inputs: Vec<ChannelInstance>,
        outputs: Vec<ChannelInstance>,
        _ctx: &ExecutionContext,
        op_ctx: &OperatorContext,
    ) -> Result<Evaluation, EvaluationError> {
        let inputs = expect_inputs(inputs, 2, self.name())?;
        let started = Instant::now();
        let n = inputs.iter().map(ChannelInstance::cardinality).sum();
        let mut parts = Vec::new();
        for input in inputs {
            parts.extend(input.into_partitions()?);
        }
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(Duration::ZERO, started.elapsed(), n, &produced);
        Ok(Evaluation {
            prepare,
            main,
            produced,
        })
    }
}
