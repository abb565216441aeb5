//! The logical operator plan: an arena of operators connected by
//! (producer output slot -> consumer input slot) edges.
//!
//! Operators are addressed by `OperatorId` (their arena index). Connectivity
//! is mutable while the plan is being built; `validate` checks the DAG
//! invariants before the plan is handed to the mapping engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::PlanError;
use crate::fingerprint::{Fingerprint, FingerprintDomain};
use crate::id::OperatorId;
use crate::types::Record;

/// Parameterless discriminant of `LogicalOp`, used by patterns and platform tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorKind {
    CollectionSource,
    TextFileSource,
    Filter,
    Map,
    Project,
    Union,
    Sink,
}

impl OperatorKind {
    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::CollectionSource => "collection_source",
            OperatorKind::TextFileSource => "text_file_source",
            OperatorKind::Filter => "filter",
            OperatorKind::Map => "map",
            OperatorKind::Project => "project",
            OperatorKind::Union => "union",
            OperatorKind::Sink => "sink",
        }
    }

    /// Number of main (non-broadcast) inputs.
    pub fn num_inputs(self) -> usize {
        use OperatorKind::*;
        match self {
            CollectionSource | TextFileSource => 0,
            Filter | Map | Project | Sink => 1,
            Union => 2,
        }
    }

    pub fn num_outputs(self) -> usize {
        match self {
            OperatorKind::Sink => 0,
            _ => 1,
        }
    }

    pub fn is_source(self) -> bool {
        self.num_inputs() == 0
    }

    pub fn is_sink(self) -> bool {
        self.num_outputs() == 0
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// High-level logical nodes (source -> transforms -> sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalOp {
    CollectionSource {
        records: Vec<Record>,
    },
    TextFileSource {
        url: String, // e.g., "file:///data/logs.txt"
    },
    Filter {
        predicate: String, // e.g. "a >= 1 and (b like 'x%' or c in @allowed)"
    },
    Map {
        expr: String, // "a AS b, c AS d"
    },
    Project {
        columns: Vec<String>,
    },
    Union,
    Sink {
        destination: String, // "memory://name" or "file:///out.jsonl"
    },
}

impl LogicalOp {
    pub fn kind(&self) -> OperatorKind {
        match self {
            LogicalOp::CollectionSource { .. } => OperatorKind::CollectionSource,
            LogicalOp::TextFileSource { .. } => OperatorKind::TextFileSource,
            LogicalOp::Filter { .. } => OperatorKind::Filter,
            LogicalOp::Map { .. } => OperatorKind::Map,
            LogicalOp::Project { .. } => OperatorKind::Project,
            LogicalOp::Union => OperatorKind::Union,
            LogicalOp::Sink { .. } => OperatorKind::Sink,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    /// Side input outside the main dataflow.
    pub broadcast: bool,
}

/// A node of the logical plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    id: OperatorId,
    name: String,
    op: LogicalOp,
    inputs: Vec<Slot>,
    outputs: Vec<Slot>,
}

impl Operator {
    fn new(id: OperatorId, name: String, op: LogicalOp) -> Self {
        let kind = op.kind();
        let inputs = (0..kind.num_inputs())
            .map(|i| Slot {
                name: format!("in{i}"),
                broadcast: false,
            })
            .collect();
        let outputs = (0..kind.num_outputs())
            .map(|i| Slot {
                name: format!("out{i}"),
                broadcast: false,
            })
            .collect();
        Self {
            id,
            name,
            op,
            inputs,
            outputs,
        }
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn op(&self) -> &LogicalOp {
        &self.op
    }
    pub fn kind(&self) -> OperatorKind {
        self.op.kind()
    }
    pub fn inputs(&self) -> &[Slot] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[Slot] {
        &self.outputs
    }
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Broadcast slots as (slot index, name).
    pub fn broadcasts(&self) -> impl Iterator<Item = (usize, &str)> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.broadcast)
            .map(|(i, s)| (i, s.name.as_str()))
    }

    pub fn has_broadcasts(&self) -> bool {
        self.inputs.iter().any(|s| s.broadcast)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(#{})", self.name, self.id.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    pub operator: OperatorId,
    pub slot: usize,
}

impl SlotRef {
    pub fn new(operator: OperatorId, slot: usize) -> Self {
        Self { operator, slot }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: SlotRef,
    pub to: SlotRef,
}

/// Directed acyclic multigraph of operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorPlan {
    operators: Vec<Operator>,
    edges: Vec<Edge>,
}

impl OperatorPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operator named after its kind.
    pub fn add(&mut self, op: LogicalOp) -> OperatorId {
        let name = op.kind().name().to_string();
        self.add_named(name, op)
    }

    pub fn add_named(&mut self, name: impl Into<String>, op: LogicalOp) -> OperatorId {
        let id = OperatorId::new(self.operators.len() as u64);
        self.operators.push(Operator::new(id, name.into(), op));
        id
    }

    /// Declare a broadcast input on `operator`; returns its slot index.
    pub fn add_broadcast(
        &mut self,
        operator: OperatorId,
        name: impl Into<String>,
    ) -> Result<usize, PlanError> {
        let op = self
            .operators
            .get_mut(operator.index())
            .ok_or(PlanError::UnknownOperator(operator))?;
        op.inputs.push(Slot {
            name: name.into(),
            broadcast: true,
        });
        Ok(op.inputs.len() - 1)
    }

    /// Connect `from`'s output slot to `to`'s input slot.
    pub fn connect(
        &mut self,
        from: OperatorId,
        out_slot: usize,
        to: OperatorId,
        in_slot: usize,
    ) -> Result<(), PlanError> {
        let producer = self.get(from)?;
        if out_slot >= producer.num_outputs() {
            return Err(PlanError::NoSuchSlot {
                operator: from,
                direction: "output",
                slot: out_slot,
            });
        }
        let consumer = self.get(to)?;
        if in_slot >= consumer.num_inputs() {
            return Err(PlanError::NoSuchSlot {
                operator: to,
                direction: "input",
                slot: in_slot,
            });
        }
        let target = SlotRef::new(to, in_slot);
        if self.producer_of(target).is_some() {
            return Err(PlanError::InputAlreadyConnected {
                operator: to,
                slot: in_slot,
            });
        }
        self.edges.push(Edge {
            from: SlotRef::new(from, out_slot),
            to: target,
        });
        Ok(())
    }

    /// Chain `from -> to` on slot 0 of both.
    pub fn chain(&mut self, from: OperatorId, to: OperatorId) -> Result<(), PlanError> {
        self.connect(from, 0, to, 0)
    }

    pub fn get(&self, id: OperatorId) -> Result<&Operator, PlanError> {
        self.operators
            .get(id.index())
            .ok_or(PlanError::UnknownOperator(id))
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn producer_of(&self, input: SlotRef) -> Option<SlotRef> {
        self.edges.iter().find(|e| e.to == input).map(|e| e.from)
    }

    pub fn consumers_of(&self, output: SlotRef) -> Vec<SlotRef> {
        self.edges
            .iter()
            .filter(|e| e.from == output)
            .map(|e| e.to)
            .collect()
    }

    /// Edges entering `id`, ordered by input slot.
    pub fn incoming(&self, id: OperatorId) -> Vec<Edge> {
        let mut v: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| e.to.operator == id)
            .copied()
            .collect();
        v.sort_by_key(|e| e.to.slot);
        v
    }

    /// Edges leaving `id`, ordered by output slot then consumer.
    pub fn outgoing(&self, id: OperatorId) -> Vec<Edge> {
        let mut v: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| e.from.operator == id)
            .copied()
            .collect();
        v.sort_by_key(|e| (e.from.slot, e.to));
        v
    }

    pub fn sources(&self) -> impl Iterator<Item = &Operator> {
        self.operators.iter().filter(|o| o.kind().is_source())
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Operator> {
        self.operators.iter().filter(|o| o.kind().is_sink())
    }

    /// Kahn's algorithm; ties broken by smallest id so the order is stable.
    pub fn topological_order(&self) -> Result<Vec<OperatorId>, PlanError> {
        let mut in_degree: HashMap<OperatorId, usize> =
            self.operators.iter().map(|o| (o.id, 0)).collect();
        for e in &self.edges {
            *in_degree.entry(e.to.operator).or_default() += 1;
        }
        let mut ready: BTreeSet<OperatorId> = in_degree
            .iter()
            .filter_map(|(id, &d)| (d == 0).then_some(*id))
            .collect();
        let mut order = Vec::with_capacity(self.operators.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for e in self.edges.iter().filter(|e| e.from.operator == id) {
                if let Some(d) = in_degree.get_mut(&e.to.operator) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(e.to.operator);
                    }
                }
            }
        }
        if order.len() != self.operators.len() {
            let stuck = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(id, _)| *id)
                .min()
                .unwrap_or(OperatorId::new(0));
            return Err(PlanError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Check every structural invariant required before mapping.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.operators.is_empty() {
            return Err(PlanError::Empty);
        }
        self.topological_order()?;
        for op in &self.operators {
            for (slot, s) in op.inputs.iter().enumerate() {
                if self.producer_of(SlotRef::new(op.id, slot)).is_none() {
                    return Err(PlanError::UnconnectedInput {
                        operator: op.id,
                        name: s.name.clone(),
                        slot,
                    });
                }
            }
            for (slot, s) in op.outputs.iter().enumerate() {
                if self.consumers_of(SlotRef::new(op.id, slot)).is_empty() {
                    return Err(PlanError::DanglingOutput {
                        operator: op.id,
                        name: s.name.clone(),
                        slot,
                    });
                }
            }
        }
        Ok(())
    }

    /// Stable digest of operators and connectivity.
    pub fn fingerprint(&self) -> crate::error::Result<Fingerprint> {
        Fingerprint::of(FingerprintDomain::OperatorPlan, self)
    }
}
