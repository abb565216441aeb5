//! Map operator with column renaming support.

use std::time::Instant;

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
use polyplan_core::types::Record;

use crate::bound::{bound_identity, expect_inputs, fill_output, Binding};

/// Parse `"col1 AS alias1, col2 AS alias2"`. Clauses without `AS` are
/// pass-throughs and dropped.
pub fn parse_renames(expr: &str) -> Vec<(String, String)> {
    let mut renames = Vec::new();
    for clause in expr.split(',') {
        let clause = clause.trim();
        if let Some(pos) = clause.to_ascii_lowercase().find(" as ") {
            let from = clause[..pos].trim();
            let to = clause[pos + 4..].trim();
            if !from.is_empty() && !to.is_empty() {
                renames.push((from.to_string(), to.to_string()));
            }
        }
    }
    renames
}

#[derive(Debug, Clone)]
pub struct Map {
    pub binding: Binding,
    /// old name -> new name
    pub renames: Vec<(String, String)>,
}

impl Map {
    pub fn new(binding: Binding, expr: &str) -> Self {
        Self {
            binding,
            renames: parse_renames(expr),
        }
    }

    fn apply(&self, mut record: Record) -> Record {
        for (name, _) in &mut record.fields {
            if let Some((_, to)) = self.renames.iter().find(|(from, _)| from.as_str() == name.as_str()) {
                *name = to.clone();
            }
        }
        record
    }
}

impl ExecutionOperator for Map {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "map"
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
        let prepare_started = Instant::now();
        let mut inputs = expect_inputs(inputs, 1, self.name())?;
        let input = inputs.remove(0);
        let n = input.cardinality();
        let partitions = input.into_partitions()?;
        let prepared = prepare_started.elapsed();

        let started = Instant::now();
        let parts = self.binding.run_partitions(partitions, |part| {
            // No renames: pass through.
            if self.renames.is_empty() {
                return Ok(part);
            }
            Ok(part.into_iter().map(|r| self.apply(r)).collect())
        })?;
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(prepared, started.elapsed(), n, &produced);
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
    use polyplan_core::id::Epoch;
    use polyplan_core::platform::Platform;
    use polyplan_core::types::Scalar;

    #[test]
    fn parses_case_insensitive_as() {
        assert_eq!(
            parse_renames("a AS b, c as d, e"),
            vec![("a".to_string(), "b".to_string()), ("c".into(), "d".into())]
        );
    }

    #[test]
    fn renames_keep_field_order() {
        let m = Map::new(Binding::new("m", Platform::Local, Epoch::INITIAL), "age AS years");
        let r = m.apply(
            Record::new()
                .with("name", Scalar::Str("x".into()))
                .with("age", Scalar::I64(3)),
        );
        assert_eq!(r.fields[1].0, "years");
        assert_eq!(r.get("years"), Some(&Scalar::I64(3)));
    }
}
