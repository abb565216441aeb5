//! Subplan patterns: a small connected template of operator patterns with
//! explicit boundary slots.
//!
//! Every slot of every pattern node is either internal (an edge inside the
//! pattern) or a boundary (attached to the rest of the plan). Broadcast
//! inputs of a matched operator are not part of the template; when a node
//! allows them they become extra input boundaries of the match.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use polyplan_core::plan::{Operator, OperatorKind};

use crate::error::PatternError;

pub type OperatorPredicate = Arc<dyn Fn(&Operator) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct OperatorPattern {
    pub name: String,
    pub kind: OperatorKind,
    predicate: Option<OperatorPredicate>,
    pub allow_broadcasts: bool,
}

impl OperatorPattern {
    pub fn new(name: impl Into<String>, kind: OperatorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            predicate: None,
            allow_broadcasts: false,
        }
    }

    /// Extra constraint on the operator's parameters.
    pub fn with_predicate(mut self, f: impl Fn(&Operator) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(f));
        self
    }

    pub fn allowing_broadcasts(mut self) -> Self {
        self.allow_broadcasts = true;
        self
    }

    pub fn matches(&self, op: &Operator) -> bool {
        op.kind() == self.kind
            && (self.allow_broadcasts || !op.has_broadcasts())
            && self.predicate.as_ref().map_or(true, |p| p(op))
    }
}

impl fmt::Debug for OperatorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorPattern")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("predicate", &self.predicate.is_some())
            .field("allow_broadcasts", &self.allow_broadcasts)
            .finish()
    }
}

/// `(node, slot)` inside a pattern.
pub type PatternSlot = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternEdge {
    pub from: PatternSlot,
    pub to: PatternSlot,
}

#[derive(Debug, Clone)]
pub struct SubplanPattern {
    name: String,
    nodes: Vec<OperatorPattern>,
    edges: Vec<PatternEdge>,
    inputs: Vec<PatternSlot>,
    outputs: Vec<PatternSlot>,
    /// Node visiting order from node 0; each later node is reached through
    /// the edge at the given index.
    traversal: Vec<(usize, Option<usize>)>,
}

impl SubplanPattern {
    pub fn builder(name: impl Into<String>) -> SubplanPatternBuilder {
        SubplanPatternBuilder {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// One node whose every slot is a boundary.
    pub fn singleton(node: OperatorPattern) -> Self {
        let kind = node.kind;
        Self {
            name: node.name.clone(),
            nodes: vec![node],
            edges: Vec::new(),
            inputs: (0..kind.num_inputs()).map(|s| (0, s)).collect(),
            outputs: (0..kind.num_outputs()).map(|s| (0, s)).collect(),
            traversal: vec![(0, None)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn nodes(&self) -> &[OperatorPattern] {
        &self.nodes
    }
    pub fn edges(&self) -> &[PatternEdge] {
        &self.edges
    }
    /// Declared input boundaries, in order.
    pub fn inputs(&self) -> &[PatternSlot] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[PatternSlot] {
        &self.outputs
    }
    pub fn traversal(&self) -> &[(usize, Option<usize>)] {
        &self.traversal
    }

    pub fn kinds(&self) -> BTreeSet<OperatorKind> {
        self.nodes.iter().map(|n| n.kind).collect()
    }
}

pub struct SubplanPatternBuilder {
    name: String,
    nodes: Vec<OperatorPattern>,
    edges: Vec<PatternEdge>,
    inputs: Vec<PatternSlot>,
    outputs: Vec<PatternSlot>,
}

impl SubplanPatternBuilder {
    /// Add a node; returns its index.
    pub fn node(&mut self, node: OperatorPattern) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn edge(&mut self, from: usize, out_slot: usize, to: usize, in_slot: usize) -> &mut Self {
        self.edges.push(PatternEdge {
            from: (from, out_slot),
            to: (to, in_slot),
        });
        self
    }

    pub fn input(&mut self, node: usize, slot: usize) -> &mut Self {
        self.inputs.push((node, slot));
        self
    }

    pub fn output(&mut self, node: usize, slot: usize) -> &mut Self {
        self.outputs.push((node, slot));
        self
    }

    pub fn build(self) -> Result<SubplanPattern, PatternError> {
        let name = self.name;
        let n = self.nodes.len();
        if n == 0 {
            return Err(PatternError::Empty(name));
        }

        let check = |(node, slot): PatternSlot, direction: &'static str| -> Result<(), PatternError> {
            let kind = self
                .nodes
                .get(node)
                .ok_or_else(|| PatternError::UnknownNode {
                    pattern: name.clone(),
                    node,
                })?
                .kind;
            let arity = match direction {
                "input" => kind.num_inputs(),
                _ => kind.num_outputs(),
            };
            if slot >= arity {
                return Err(PatternError::SlotOutOfRange {
                    pattern: name.clone(),
                    node,
                    direction,
                    slot,
                });
            }
            Ok(())
        };
        for e in &self.edges {
            check(e.from, "output")?;
            check(e.to, "input")?;
        }
        for s in &self.inputs {
            check(*s, "input")?;
        }
        for s in &self.outputs {
            check(*s, "output")?;
        }

        let binding = |node: usize, slot: usize, direction: &'static str, problem: &'static str| {
            PatternError::SlotBinding {
                pattern: name.clone(),
                node,
                direction,
                slot,
                problem,
            }
        };
        for (node, pattern) in self.nodes.iter().enumerate() {
            for slot in 0..pattern.kind.num_inputs() {
                let internal = self.edges.iter().filter(|e| e.to == (node, slot)).count();
                let boundary = self.inputs.iter().filter(|s| **s == (node, slot)).count();
                match (internal, boundary) {
                    (0, 0) => return Err(binding(node, slot, "input", "unbound")),
                    (1, 0) | (0, 1) => {}
                    (0, _) => return Err(binding(node, slot, "input", "a duplicated boundary")),
                    _ => return Err(binding(node, slot, "input", "bound more than once")),
                }
            }
            for slot in 0..pattern.kind.num_outputs() {
                let internal = self.edges.iter().any(|e| e.from == (node, slot));
                let boundary = self.outputs.iter().filter(|s| **s == (node, slot)).count();
                match (internal, boundary) {
                    (false, 0) => return Err(binding(node, slot, "output", "unbound")),
                    (true, 0) | (false, 1) => {}
                    (false, _) => return Err(binding(node, slot, "output", "a duplicated boundary")),
                    (true, _) => return Err(binding(node, slot, "output", "both internal and boundary")),
                }
            }
        }

        // Acyclic: Kahn over pattern nodes.
        let mut in_degree = vec![0usize; n];
        for e in &self.edges {
            in_degree[e.to.0] += 1;
        }
        let mut ready: Vec<usize> = (0..n).filter(|i| in_degree[*i] == 0).collect();
        let mut seen = 0;
        while let Some(i) = ready.pop() {
            seen += 1;
            for e in self.edges.iter().filter(|e| e.from.0 == i) {
                in_degree[e.to.0] -= 1;
                if in_degree[e.to.0] == 0 {
                    ready.push(e.to.0);
                }
            }
        }
        if seen != n {
            return Err(PatternError::Cyclic(name));
        }

        // Connected: BFS from node 0 over undirected edges.
        let mut traversal = vec![(0, None)];
        let mut visited = vec![false; n];
        visited[0] = true;
        let mut queue = VecDeque::from([0usize]);
        while let Some(i) = queue.pop_front() {
            for (idx, e) in self.edges.iter().enumerate() {
                let next = if e.from.0 == i {
                    e.to.0
                } else if e.to.0 == i {
                    e.from.0
                } else {
                    continue;
                };
                if !visited[next] {
                    visited[next] = true;
                    traversal.push((next, Some(idx)));
                    queue.push_back(next);
                }
            }
        }
        if traversal.len() != n {
            return Err(PatternError::Disconnected(name));
        }

        Ok(SubplanPattern {
            name,
            nodes: self.nodes,
            edges: self.edges,
            inputs: self.inputs,
            outputs: self.outputs,
            traversal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_project() -> SubplanPatternBuilder {
        let mut b = SubplanPattern::builder("filter_project");
        let f = b.node(OperatorPattern::new("filter", OperatorKind::Filter));
        let p = b.node(OperatorPattern::new("project", OperatorKind::Project));
        b.edge(f, 0, p, 0).input(f, 0).output(p, 0);
        b
    }

    #[test]
    fn two_node_chain_builds() {
        let p = filter_project().build().unwrap();
        assert_eq!(p.nodes().len(), 2);
        assert_eq!(p.traversal(), &[(0, None), (1, Some(0))]);
    }

    #[test]
    fn unbound_slot_is_rejected() {
        let mut b = SubplanPattern::builder("bad");
        let f = b.node(OperatorPattern::new("filter", OperatorKind::Filter));
        b.output(f, 0);
        assert!(matches!(
            b.build(),
            Err(PatternError::SlotBinding { problem: "unbound", .. })
        ));
    }

    #[test]
    fn slot_beyond_arity_is_rejected() {
        let mut b = filter_project();
        b.input(0, 3);
        assert!(matches!(b.build(), Err(PatternError::SlotOutOfRange { .. })));
    }

    #[test]
    fn boundary_and_internal_on_same_slot_is_rejected() {
        let mut b = filter_project();
        b.output(0, 0);
        assert!(matches!(b.build(), Err(PatternError::SlotBinding { .. })));
    }

    #[test]
    fn disconnected_and_cyclic_patterns_fail() {
        let mut b = SubplanPattern::builder("split");
        let a = b.node(OperatorPattern::new("a", OperatorKind::Map));
        let c = b.node(OperatorPattern::new("c", OperatorKind::Map));
        b.input(a, 0).output(a, 0).input(c, 0).output(c, 0);
        assert!(matches!(b.build(), Err(PatternError::Disconnected(_))));

        let mut b = SubplanPattern::builder("loop");
        let a = b.node(OperatorPattern::new("a", OperatorKind::Map));
        let c = b.node(OperatorPattern::new("c", OperatorKind::Map));
        b.edge(a, 0, c, 0).edge(c, 0, a, 0);
        assert!(matches!(b.build(), Err(PatternError::Cyclic(_))));
    }

    #[test]
    fn singleton_covers_every_slot() {
        let p = SubplanPattern::singleton(OperatorPattern::new("union", OperatorKind::Union));
        assert_eq!(p.inputs(), &[(0, 0), (0, 1)]);
        assert_eq!(p.outputs(), &[(0, 0)]);
    }
}
