//! The mapping engine: every occurrence of every registered pattern,
//! materialized as a costed candidate.
//!
//! Overlapping matches are all kept; choosing among them is the
//! optimizer's job.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use polyplan_core::config::CostWeights;
use polyplan_core::id::{CandidateId, Epoch, OperatorId, RuleId};
use polyplan_core::load::LoadProfile;
use polyplan_core::plan::{Operator, OperatorPlan, SlotRef};
use polyplan_core::platform::Platform;
use polyplan_estimator::{InputStatistics, LoadProfileEstimator, PlanStatistics};

use crate::error::MappingError;
use crate::pattern::SubplanPattern;
use crate::rule::{ReplacementSubplan, RuleRegistry};

/// One occurrence of a pattern in a plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubplanMatch {
    /// Plan operator bound to each pattern node.
    pub nodes: Vec<OperatorId>,
    /// Consumer-side plan slots of the input boundaries: declared ones in
    /// pattern order, then broadcast inputs of the matched operators.
    pub inputs: Vec<SlotRef>,
    /// Producer-side plan slots of the output boundaries.
    pub outputs: Vec<SlotRef>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatorEstimate {
    pub prepare: LoadProfile,
    pub main: LoadProfile,
}

/// A platform-bound replacement for one match, with its estimated cost.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: CandidateId,
    pub rule: RuleId,
    pub rule_name: String,
    pub platform: Platform,
    pub matched: SubplanMatch,
    pub covered: BTreeSet<OperatorId>,
    pub replacement: ReplacementSubplan,
    /// One entry per replacement operator.
    pub estimates: Vec<OperatorEstimate>,
    pub profile: LoadProfile,
    pub cost: f64,
}

/// All matches of `pattern` in `plan`, sorted and free of duplicates.
pub fn find_matches(pattern: &SubplanPattern, plan: &OperatorPlan) -> Vec<SubplanMatch> {
    let mut found = BTreeSet::new();
    let mut assignment = vec![None; pattern.nodes().len()];
    extend(pattern, plan, 0, &mut assignment, &mut found);
    found
        .into_iter()
        .filter_map(|nodes| build_match(pattern, plan, nodes))
        .collect()
}

fn extend(
    pattern: &SubplanPattern,
    plan: &OperatorPlan,
    depth: usize,
    assignment: &mut Vec<Option<OperatorId>>,
    found: &mut BTreeSet<Vec<OperatorId>>,
) {
    let Some(&(node, via)) = pattern.traversal().get(depth) else {
        let nodes: Vec<OperatorId> = assignment.iter().flatten().copied().collect();
        if nodes.len() == assignment.len() && is_induced(pattern, plan, &nodes) {
            found.insert(nodes);
        }
        return;
    };

    let candidates: Vec<OperatorId> = match via {
        None => plan.operators().iter().map(Operator::id).collect(),
        Some(edge) => {
            let e = pattern.edges()[edge];
            if e.to.0 == node {
                let Some(producer) = assignment[e.from.0] else {
                    return;
                };
                plan.consumers_of(SlotRef::new(producer, e.from.1))
                    .into_iter()
                    .filter(|c| c.slot == e.to.1)
                    .map(|c| c.operator)
                    .collect()
            } else {
                let Some(consumer) = assignment[e.to.0] else {
                    return;
                };
                plan.producer_of(SlotRef::new(consumer, e.to.1))
                    .filter(|p| p.slot == e.from.1)
                    .map(|p| p.operator)
                    .into_iter()
                    .collect()
            }
        }
    };

    for id in candidates {
        if assignment.contains(&Some(id)) {
            continue;
        }
        let Ok(op) = plan.get(id) else { continue };
        if !pattern.nodes()[node].matches(op) {
            continue;
        }
        assignment[node] = Some(id);
        extend(pattern, plan, depth + 1, assignment, found);
        assignment[node] = None;
    }
}

/// The plan edges among `nodes` are exactly the pattern edges, and no
/// internal output leaks to an operator outside the match.
fn is_induced(pattern: &SubplanPattern, plan: &OperatorPlan, nodes: &[OperatorId]) -> bool {
    let index: BTreeMap<OperatorId, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    for e in pattern.edges() {
        let from = SlotRef::new(nodes[e.from.0], e.from.1);
        let to = SlotRef::new(nodes[e.to.0], e.to.1);
        if plan.producer_of(to) != Some(from) {
            return false;
        }
        if plan
            .consumers_of(from)
            .iter()
            .any(|c| !index.contains_key(&c.operator))
        {
            return false;
        }
    }

    plan.edges().iter().all(|edge| {
        match (index.get(&edge.from.operator), index.get(&edge.to.operator)) {
            (Some(&f), Some(&t)) => pattern
                .edges()
                .iter()
                .any(|e| e.from == (f, edge.from.slot) && e.to == (t, edge.to.slot)),
            _ => true,
        }
    })
}

fn build_match(pattern: &SubplanPattern, plan: &OperatorPlan, nodes: Vec<OperatorId>) -> Option<SubplanMatch> {
    let mut inputs: Vec<SlotRef> = pattern
        .inputs()
        .iter()
        .map(|(n, s)| SlotRef::new(nodes[*n], *s))
        .collect();
    for id in &nodes {
        let op = plan.get(*id).ok()?;
        inputs.extend(op.broadcasts().map(|(slot, _)| SlotRef::new(*id, slot)));
    }
    let outputs = pattern
        .outputs()
        .iter()
        .map(|(n, s)| SlotRef::new(nodes[*n], *s))
        .collect();
    Some(SubplanMatch { nodes, inputs, outputs })
}

/// Matches a registry against plans and prices the replacements.
pub struct MappingEngine<'a> {
    registry: &'a RuleRegistry,
    estimator: &'a LoadProfileEstimator,
    weights: &'a CostWeights,
}

impl<'a> MappingEngine<'a> {
    pub fn new(registry: &'a RuleRegistry, estimator: &'a LoadProfileEstimator, weights: &'a CostWeights) -> Self {
        Self {
            registry,
            estimator,
            weights,
        }
    }

    /// Every candidate replacement for `plan`, in a registration-independent order.
    pub fn match_all(
        &self,
        plan: &OperatorPlan,
        stats: &PlanStatistics,
        epoch: Epoch,
    ) -> Result<Vec<Candidate>, MappingError> {
        let mut candidates = Vec::new();
        for (rule_id, rule) in self.registry.rules() {
            let matches = find_matches(&rule.pattern, plan);
            trace!(rule = %rule.name, matches = matches.len(), "pattern scan");
            for m in matches {
                let ops = m
                    .nodes
                    .iter()
                    .map(|id| plan.get(*id))
                    .collect::<Result<Vec<_>, _>>()?;
                let replacement = rule.replace(&ops, m.inputs.len(), m.outputs.len(), epoch)?;
                let estimates = self.estimate(plan, stats, &m, &replacement);
                let profile = estimates
                    .iter()
                    .fold(LoadProfile::zero(), |acc, e| acc + e.prepare + e.main);
                let cost = profile.cost(self.weights);
                candidates.push(Candidate {
                    id: CandidateId::new(0),
                    rule: rule_id,
                    rule_name: rule.name.clone(),
                    platform: rule.platform,
                    covered: m.nodes.iter().copied().collect(),
                    matched: m,
                    replacement,
                    estimates,
                    profile,
                    cost,
                });
            }
        }

        candidates.sort_by(|a, b| {
            (&a.covered, a.platform, &a.rule_name, &a.matched).cmp(&(&b.covered, b.platform, &b.rule_name, &b.matched))
        });
        for (i, c) in candidates.iter_mut().enumerate() {
            c.id = CandidateId::new(i as u64);
        }
        debug!(
            rules = self.registry.len(),
            candidates = candidates.len(),
            %epoch,
            "matched plan"
        );
        Ok(candidates)
    }

    fn estimate(
        &self,
        plan: &OperatorPlan,
        stats: &PlanStatistics,
        m: &SubplanMatch,
        replacement: &ReplacementSubplan,
    ) -> Vec<OperatorEstimate> {
        let mut produced = vec![InputStatistics::unknown(); replacement.operators.len()];
        let mut estimates = Vec::with_capacity(replacement.operators.len());

        for (i, op) in replacement.operators.iter().enumerate() {
            let mut inputs = vec![InputStatistics::unknown(); op.num_inputs()];
            for (b, (target, slot)) in replacement.inputs.iter().enumerate() {
                if *target == i {
                    if let (Some(input), Some(boundary)) = (inputs.get_mut(*slot), m.inputs.get(b)) {
                        *input = plan
                            .producer_of(*boundary)
                            .map(|p| stats.output(p.operator))
                            .unwrap_or_default();
                    }
                }
            }
            for ((from, _), (to, slot)) in &replacement.links {
                if *to == i {
                    if let Some(input) = inputs.get_mut(*slot) {
                        *input = produced[*from];
                    }
                }
            }
            // Sources are sized by what they emit.
            if inputs.is_empty() {
                inputs.push(stats.output(m.nodes[0]));
            }

            produced[i] = replacement
                .outputs
                .iter()
                .position(|(op_idx, _)| *op_idx == i)
                .and_then(|j| m.outputs.get(j))
                .map(|s| stats.output(s.operator))
                .unwrap_or(inputs[0]);

            let keys = op.load_profile_keys();
            estimates.push(OperatorEstimate {
                prepare: self.estimator.estimate(&keys.prepare, &[]),
                main: self.estimator.estimate(&keys.main, &inputs),
            });
        }
        estimates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::OperatorPattern;
    use polyplan_core::plan::{LogicalOp, OperatorKind};

    fn chain() -> OperatorPlan {
        let mut plan = OperatorPlan::new();
        let src = plan.add(LogicalOp::CollectionSource { records: vec![] });
        let f = plan.add(LogicalOp::Filter {
            predicate: "a > 1".into(),
        });
        let p = plan.add(LogicalOp::Project {
            columns: vec!["a".into()],
        });
        let sink = plan.add(LogicalOp::Sink {
            destination: "memory://o".into(),
        });
        plan.chain(src, f).unwrap();
        plan.chain(f, p).unwrap();
        plan.chain(p, sink).unwrap();
        plan
    }

    fn filter_project() -> SubplanPattern {
        let mut b = SubplanPattern::builder("filter_project");
        let f = b.node(OperatorPattern::new("filter", OperatorKind::Filter));
        let p = b.node(OperatorPattern::new("project", OperatorKind::Project));
        b.edge(f, 0, p, 0).input(f, 0).output(p, 0);
        b.build().unwrap()
    }

    #[test]
    fn singleton_matches_each_operator_of_its_kind() {
        let plan = chain();
        let p = SubplanPattern::singleton(OperatorPattern::new("filter", OperatorKind::Filter));
        let m = find_matches(&p, &plan);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].nodes, vec![OperatorId::new(1)]);
        assert_eq!(m[0].inputs, vec![SlotRef::new(OperatorId::new(1), 0)]);
    }

    #[test]
    fn chain_pattern_matches_connected_pair() {
        let plan = chain();
        let m = find_matches(&filter_project(), &plan);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].nodes, vec![OperatorId::new(1), OperatorId::new(2)]);
        assert_eq!(m[0].outputs, vec![SlotRef::new(OperatorId::new(2), 0)]);
    }

    #[test]
    fn internal_output_with_outside_consumer_does_not_match() {
        let mut plan = chain();
        let extra = plan.add(LogicalOp::Sink {
            destination: "memory://side".into(),
        });
        plan.connect(OperatorId::new(1), 0, extra, 0).unwrap();
        assert!(find_matches(&filter_project(), &plan).is_empty());
    }

    #[test]
    fn predicate_and_broadcasts_restrict_matches() {
        let mut plan = chain();
        let only_eq = SubplanPattern::singleton(
            OperatorPattern::new("filter", OperatorKind::Filter)
                .with_predicate(|op| matches!(op.op(), LogicalOp::Filter { predicate } if predicate.contains("=="))),
        );
        assert!(find_matches(&only_eq, &plan).is_empty());

        let slot = plan.add_broadcast(OperatorId::new(1), "bc").unwrap();
        plan.connect(OperatorId::new(0), 0, OperatorId::new(1), slot).unwrap();
        let plain = SubplanPattern::singleton(OperatorPattern::new("filter", OperatorKind::Filter));
        assert!(find_matches(&plain, &plan).is_empty());
        let with_bc =
            SubplanPattern::singleton(OperatorPattern::new("filter", OperatorKind::Filter).allowing_broadcasts());
        let m = find_matches(&with_bc, &plan);
        assert_eq!(m[0].inputs.len(), 2);
        assert_eq!(m[0].inputs[1], SlotRef::new(OperatorId::new(1), slot));
    }
}
