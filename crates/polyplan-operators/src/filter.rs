//! Row filters, plain and fused with a following projection.

use std::collections::BTreeMap;
use std::time::Instant;

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
use polyplan_core::plan::Operator;

use crate::bound::{bound_identity, expect_inputs, fill_output, Binding};
use crate::error::{OpError, Result};
use crate::predicate::{broadcast_members, Memberships, Predicate};
use crate::project::project_record;

#[derive(Debug, Clone)]
pub struct Filter {
    pub binding: Binding,
    pub predicate: Predicate,
    /// Input slot of each broadcast an `in @name` test reads.
    pub broadcast_slots: BTreeMap<String, usize>,
    inputs: usize,
}

impl Filter {
    /// Bind `predicate` against the slots of the logical operator `op`.
    pub fn new(binding: Binding, op: &Operator, predicate: &str) -> Result<Self> {
        let predicate = Predicate::parse(predicate)?;
        let mut broadcast_slots = BTreeMap::new();
        for name in predicate.broadcasts() {
            let slot = op
                .broadcasts()
                .find(|(_, n)| *n == name)
                .map(|(slot, _)| slot)
                .ok_or_else(|| OpError::UnknownBroadcast(name.to_string()))?;
            broadcast_slots.insert(name.to_string(), slot);
        }
        Ok(Self {
            binding,
            predicate,
            broadcast_slots,
            inputs: op.num_inputs(),
        })
    }
}

impl ExecutionOperator for Filter {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "filter"
    }

    fn num_inputs(&self) -> usize {
        self.inputs
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
    ) -> std::result::Result<Evaluation, EvaluationError> {
        let mut inputs = expect_inputs(inputs, self.inputs, self.name())?;
        let input_cardinality = inputs.iter().map(ChannelInstance::cardinality).sum();

        let started = Instant::now();
        let mut members = Memberships::new();
        for (column, broadcast) in self.predicate.memberships() {
            let side = self
                .broadcast_slots
                .get(broadcast)
                .and_then(|slot| inputs.get(*slot))
                .ok_or_else(|| {
                    EvaluationError::InvalidParameters(format!("missing broadcast input @{broadcast}"))
                })?;
            members.insert(broadcast, column, broadcast_members(column, side.records()?));
        }
        inputs.truncate(1);
        let prepared = started.elapsed();

        let main_started = Instant::now();
        let main = inputs.pop().ok_or_else(|| {
            EvaluationError::InvalidParameters(format!("{} has no main input", self.name()))
        })?;
        let parts = self.binding.run_partitions(main.into_partitions()?, |part| {
            Ok(part
                .into_iter()
                .filter(|r| self.predicate.eval(r, &members))
                .collect())
        })?;
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(prepared, main_started.elapsed(), input_cardinality, &produced);
        Ok(Evaluation {
            prepare,
            main,
            produced,
        })
    }
}

/// `filter` followed by `project` in a single pass.
#[derive(Debug, Clone)]
pub struct FilterProject {
    pub binding: Binding,
    pub predicate: Predicate,
    pub columns: Vec<String>,
}

impl FilterProject {
    pub fn new(binding: Binding, predicate: &str, columns: Vec<String>) -> Result<Self> {
        let predicate = Predicate::parse(predicate)?;
        if let Some(name) = predicate.broadcasts().into_iter().next() {
            return Err(OpError::UnknownBroadcast(name.to_string()));
        }
        Ok(Self {
            binding,
            predicate,
            columns,
        })
    }
}

impl ExecutionOperator for FilterProject {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "filter_project"
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
    ) -> std::result::Result<Evaluation, EvaluationError> {
        let mut inputs = expect_inputs(inputs, 1, self.name())?;
        let main_started = Instant::now();
        let input = inputs.remove(0);
        let input_cardinality = input.cardinality();
        let none = Memberships::new();
        let parts = self.binding.run_partitions(input.into_partitions()?, |part| {
            Ok(part
                .iter()
                .filter(|r| self.predicate.eval(r, &none))
                .map(|r| project_record(r, &self.columns))
                .collect())
        })?;
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(
            std::time::Duration::ZERO,
            main_started.elapsed(),
            input_cardinality,
            &produced,
        );
        Ok(Evaluation {
            prepare,
            main,
            produced,
        })
    }
}
