//! Column projection.

use std::time::{Duration, Instant};

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
use polyplan_core::types::Record;

use crate::bound::{bound_identity, expect_inputs, fill_output, Binding};

/// Keep `columns`, in the listed order; fields the record lacks are skipped.
pub fn project_record(record: &Record, columns: &[String]) -> Record {
    let mut out = Record::new();
    for c in columns {
        if let Some(v) = record.get(c) {
            out.set(c.clone(), v.clone());
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Project {
    pub binding: Binding,
    pub columns: Vec<String>,
}

impl Project {
    pub fn new(binding: Binding, columns: Vec<String>) -> Self {
        Self { binding, columns }
    }
}

impl ExecutionOperator for Project {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "project"
    }

    fn num_inputs(&self) -> usize {
        1
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
        let mut inputs = expect_inputs(inputs, 1, self.name())?;
        let started = Instant::now();
        let input = inputs.remove(0);
        let n = input.cardinality();
        let parts = self.binding.run_partitions(input.into_partitions()?, |part| {
            Ok(part.iter().map(|r| project_record(r, &self.columns)).collect())
        })?;
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(Duration::ZERO, started.elapsed(), n, &produced);
        Ok(Evaluation {
            prepare,
            main,
            produced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyplan_core::types::Scalar;

    #[test]
    fn projection_follows_column_list_order() {
        let r = Record::new()
            .with("a", Scalar::I64(1))
            .with("b", Scalar::I64(2))
            .with("c", Scalar::I64(3));
        let p = project_record(&r, &["c".into(), "a".into(), "zz".into()]);
        let names: Vec<&str> = p.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }
}
