//! Execution lineage: per-operator provenance and realized cost.
//!
//! The driver accumulates nodes in a `LineageBuilder` during one run and
//! seals it into an immutable `LineageGraph`, which outlives the run and
//! feeds estimator calibration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{ChannelId, LineageId, TaskId};
use crate::load::LoadProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineagePhase {
    /// Fixed per-invocation cost.
    Prepare,
    /// Data-dependent cost.
    Main,
    /// A produced channel instance.
    Channel,
    /// An inserted channel conversion.
    Conversion,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealizedCost {
    pub elapsed_ms: f64,
    pub input_cardinality: u64,
    pub output_cardinality: u64,
    pub output_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLineageNode {
    pub task: TaskId,
    pub operator: String,
    pub phase: LineagePhase,
    /// Load-profile specification key that was applied, if any.
    pub spec_key: Option<String>,
    pub estimate: Option<LoadProfile>,
    pub realized: Option<RealizedCost>,
    pub channel: Option<ChannelId>,
}

impl ExecutionLineageNode {
    pub fn new(task: TaskId, operator: impl Into<String>, phase: LineagePhase) -> Self {
        Self {
            task,
            operator: operator.into(),
            phase,
            spec_key: None,
            estimate: None,
            realized: None,
            channel: None,
        }
    }

    pub fn with_spec(mut self, key: impl Into<String>, estimate: Option<LoadProfile>) -> Self {
        self.spec_key = Some(key.into());
        self.estimate = estimate;
        self
    }

    pub fn with_channel(mut self, channel: ChannelId) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// Mutable lineage under construction; owned by the driver for one run.
#[derive(Debug, Default)]
pub struct LineageBuilder {
    nodes: Vec<ExecutionLineageNode>,
    edges: Vec<(LineageId, LineageId)>,
}

impl LineageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: ExecutionLineageNode) -> LineageId {
        let id = LineageId::new(self.nodes.len() as u64);
        self.nodes.push(node);
        id
    }

    /// Record `predecessor` as an upstream contributor of `node`.
    pub fn add_predecessor(&mut self, node: LineageId, predecessor: LineageId) {
        if !self.edges.contains(&(predecessor, node)) {
            self.edges.push((predecessor, node));
        }
    }

    pub fn node_mut(&mut self, id: LineageId) -> Option<&mut ExecutionLineageNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn seal(self, run_id: Uuid, plan_fingerprint: String, started_ms: u64, finished_ms: u64) -> LineageGraph {
        LineageGraph {
            run_id,
            engine_version: crate::VERSION.to_string(),
            plan_fingerprint,
            started_ms,
            finished_ms,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

/// Sealed, read-only lineage of one plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageGraph {
    run_id: Uuid,
    engine_version: String,
    plan_fingerprint: String,
    started_ms: u64,
    finished_ms: u64,
    nodes: Vec<ExecutionLineageNode>,
    /// (predecessor, successor)
    edges: Vec<(LineageId, LineageId)>,
}

/// Value-free shape of a lineage graph, for comparing runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageShape {
    pub nodes: Vec<(TaskId, String, LineagePhase)>,
    pub edges: Vec<(LineageId, LineageId)>,
}

impl LineageGraph {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }
    pub fn plan_fingerprint(&self) -> &str {
        &self.plan_fingerprint
    }
    pub fn started_ms(&self) -> u64 {
        self.started_ms
    }
    pub fn finished_ms(&self) -> u64 {
        self.finished_ms
    }
    pub fn nodes(&self) -> &[ExecutionLineageNode] {
        &self.nodes
    }
    pub fn edges(&self) -> &[(LineageId, LineageId)] {
        &self.edges
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: LineageId) -> Option<&ExecutionLineageNode> {
        self.nodes.get(id.index())
    }

    pub fn predecessors(&self, id: LineageId) -> Vec<LineageId> {
        self.edges
            .iter()
            .filter(|(_, s)| *s == id)
            .map(|(p, _)| *p)
            .collect()
    }

    /// Nodes of a given phase with their ids.
    pub fn phase(&self, phase: LineagePhase) -> impl Iterator<Item = (LineageId, &ExecutionLineageNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.phase == phase)
            .map(|(i, n)| (LineageId::new(i as u64), n))
    }

    pub fn shape(&self) -> LineageShape {
        LineageShape {
            nodes: self
                .nodes
                .iter()
                .map(|n| (n.task, n.operator.clone(), n.phase))
                .collect(),
            edges: self.edges.clone(),
        }
    }
}
