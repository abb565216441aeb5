//! Plan optimizer: choose a set of candidates that covers every logical
//! operator exactly once, with compatible channels between them, at
//! minimum estimated cost.
//!
//! Small problems are solved exactly by branch-and-bound over "first
//! uncovered operator in topological order"; the bound is the running cost
//! plus, for each uncovered operator, the cheapest per-operator share of any
//! candidate covering it. Above `exhaustive_candidate_limit` candidates a
//! greedy pass takes the cheapest non-overlapping candidate per operator.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, trace};

use polyplan_core::channel::{ChannelConversion, CONVERSIONS};
use polyplan_core::config::OptimizerConfig;
use polyplan_core::config::CostWeights;
use polyplan_core::id::{CandidateId, Epoch, OperatorId, TaskId};
use polyplan_core::plan::{OperatorPlan, SlotRef};
use polyplan_estimator::{LoadProfileEstimator, PlanStatistics};

use crate::channels::{accepted_on, resolve_group, GroupResolution};
use crate::error::OptimizeError;
use crate::execution::{ExecutionPlan, Junction, JunctionTarget, Task, TaskSlot};
use crate::matcher::Candidate;

/// Total order over complete selections; smaller is better.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionScore {
    pub cost: f64,
    pub cross_platform: usize,
    /// Platform priority rank of each operator, in topological order.
    pub ranks: Vec<usize>,
    /// Covering candidate of each operator, in topological order.
    pub candidates: Vec<CandidateId>,
}

impl SelectionScore {
    /// Cost first (relative tolerance 1e-9), then cross-platform links,
    /// then platform priority, then candidate ids.
    pub fn compare(&self, other: &SelectionScore) -> Ordering {
        if !same_cost(self.cost, other.cost) {
            return self.cost.total_cmp(&other.cost);
        }
        self.cross_platform
            .cmp(&other.cross_platform)
            .then_with(|| self.ranks.cmp(&other.ranks))
            .then_with(|| self.candidates.cmp(&other.candidates))
    }
}

fn same_cost(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// A producer output slot and every consumer of it.
#[derive(Debug, Clone)]
struct OutputGroup {
    producer: SlotRef,
    consumers: Vec<SlotRef>,
}

/// Channel resolution of one group under a given assignment.
#[derive(Debug, Clone)]
struct GroupOutcome {
    resolution: GroupResolution,
    /// (candidate, replacement operator, slot)
    producer: (usize, usize, usize),
    /// (candidate, replacement operator, slot, cross-platform) per external consumer.
    consumers: Vec<(usize, usize, usize, bool)>,
}

#[derive(Debug, Clone)]
struct ChannelFailure {
    producer: String,
    consumer: String,
}

pub struct OptimizationProblem<'a> {
    plan: &'a OperatorPlan,
    candidates: &'a [Candidate],
    config: &'a OptimizerConfig,
    order: Vec<OperatorId>,
    position: BTreeMap<OperatorId, usize>,
    /// Per position, covering candidates sorted by cost.
    covering: Vec<Vec<usize>>,
    groups: Vec<OutputGroup>,
    /// Per position, the groups it produces or consumes.
    touching: Vec<Vec<usize>>,
    /// Per group, cost of each entry of `CONVERSIONS`.
    conversion_costs: Vec<Vec<f64>>,
    /// Per position, cheapest per-operator share of a covering candidate.
    lower_share: Vec<f64>,
}

/// A chosen selection and its score.
#[derive(Debug, Clone)]
pub struct Solution {
    pub selection: Vec<usize>,
    pub score: SelectionScore,
}

impl<'a> OptimizationProblem<'a> {
    pub fn new(
        plan: &'a OperatorPlan,
        candidates: &'a [Candidate],
        estimator: &LoadProfileEstimator,
        stats: &PlanStatistics,
        config: &'a OptimizerConfig,
    ) -> Result<Self, OptimizeError> {
        let order = plan
            .topological_order()
            .map_err(|e| OptimizeError::Internal(e.to_string()))?;
        let position: BTreeMap<OperatorId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut covering = vec![Vec::new(); order.len()];
        for (ci, c) in candidates.iter().enumerate() {
            for op in &c.covered {
                if let Some(&pos) = position.get(op) {
                    covering[pos].push(ci);
                }
            }
        }
        for list in &mut covering {
            list.sort_by(|a, b| {
                candidates[*a]
                    .cost
                    .total_cmp(&candidates[*b].cost)
                    .then(a.cmp(b))
            });
        }

        let mut groups = Vec::new();
        let mut touching = vec![Vec::new(); order.len()];
        for id in &order {
            let op = plan.get(*id).map_err(|e| OptimizeError::Internal(e.to_string()))?;
            for slot in 0..op.num_outputs() {
                let producer = SlotRef::new(*id, slot);
                let consumers = plan.consumers_of(producer);
                let g = groups.len();
                touching[position[id]].push(g);
                for c in &consumers {
                    if let Some(&pos) = position.get(&c.operator) {
                        if !touching[pos].contains(&g) {
                            touching[pos].push(g);
                        }
                    }
                }
                groups.push(OutputGroup { producer, consumers });
            }
        }

        let weights: &CostWeights = &config.cost_weights;
        let conversion_costs = groups
            .iter()
            .map(|g| {
                let input = [stats.output(g.producer.operator)];
                CONVERSIONS
                    .iter()
                    .map(|c| estimator.estimate(c.spec_key, &input).cost(weights))
                    .collect()
            })
            .collect();

        let lower_share = covering
            .iter()
            .map(|list| {
                list.iter()
                    .map(|ci| candidates[*ci].cost / candidates[*ci].covered.len().max(1) as f64)
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();

        Ok(Self {
            plan,
            candidates,
            config,
            order,
            position,
            covering,
            groups,
            touching,
            conversion_costs,
            lower_share,
        })
    }

    pub fn candidates(&self) -> &[Candidate] {
        self.candidates
    }

    /// Names of operators no candidate covers.
    pub fn uncovered(&self) -> Vec<String> {
        self.covering
            .iter()
            .enumerate()
            .filter(|(_, list)| list.is_empty())
            .map(|(pos, _)| self.name_at(pos))
            .collect()
    }

    fn name_at(&self, pos: usize) -> String {
        self.plan
            .get(self.order[pos])
            .map(|o| o.name().to_string())
            .unwrap_or_else(|_| self.order[pos].to_string())
    }

    fn name_of(&self, id: OperatorId) -> String {
        self.plan
            .get(id)
            .map(|o| o.name().to_string())
            .unwrap_or_else(|_| id.to_string())
    }

    fn pos(&self, id: OperatorId) -> Option<usize> {
        self.position.get(&id).copied()
    }

    /// Score a selection given as candidate indices; `None` unless it is an
    /// exact cover with compatible channels everywhere.
    pub fn score(&self, selection: &[usize]) -> Option<SelectionScore> {
        let assign = self.assignment(selection)?;
        self.score_assignment(&assign).ok()
    }

    fn assignment(&self, selection: &[usize]) -> Option<Vec<usize>> {
        let mut assign = vec![None; self.order.len()];
        for &ci in selection {
            for op in &self.candidates.get(ci)?.covered {
                let slot = &mut assign[self.pos(*op)?];
                if slot.is_some() {
                    return None;
                }
                *slot = Some(ci);
            }
        }
        assign.into_iter().collect()
    }

    fn score_assignment(&self, assign: &[usize]) -> Result<SelectionScore, ChannelFailure> {
        let partial: Vec<Option<usize>> = assign.iter().copied().map(Some).collect();
        let mut chosen: Vec<usize> = assign.to_vec();
        chosen.sort_unstable();
        chosen.dedup();

        let mut cost: f64 = chosen.iter().map(|ci| self.candidates[*ci].cost).sum();
        let mut cross_platform = 0;
        for g in 0..self.groups.len() {
            if let Some(outcome) = self.evaluate_group(g, &partial)? {
                cost += outcome.resolution.cost;
                cross_platform += outcome.consumers.iter().filter(|c| c.3).count();
            }
        }
        Ok(SelectionScore {
            cost,
            cross_platform,
            ranks: assign
                .iter()
                .map(|ci| self.config.platform_rank(self.candidates[*ci].platform))
                .collect(),
            candidates: assign.iter().map(|ci| self.candidates[*ci].id).collect(),
        })
    }

    /// `Ok(None)` when the group is internal to its producer's candidate.
    fn evaluate_group(&self, g: usize, assign: &[Option<usize>]) -> Result<Option<GroupOutcome>, ChannelFailure> {
        let group = &self.groups[g];
        let internal_fault = |consumer: &str| ChannelFailure {
            producer: self.name_of(group.producer.operator),
            consumer: consumer.to_string(),
        };
        let Some(pc) = self.pos(group.producer.operator).and_then(|p| assign[p]) else {
            return Err(internal_fault("<unassigned producer>"));
        };
        let producer_cand = &self.candidates[pc];

        let mut external = Vec::new();
        for c in &group.consumers {
            let Some(cc) = self.pos(c.operator).and_then(|p| assign[p]) else {
                return Err(internal_fault(&self.name_of(c.operator)));
            };
            if cc != pc {
                external.push((*c, cc));
            }
        }
        if external.is_empty() {
            return Ok(None);
        }

        let fail = |consumer: OperatorId| ChannelFailure {
            producer: self.name_of(group.producer.operator),
            consumer: self.name_of(consumer),
        };
        let (pi, ps) = producer_cand
            .matched
            .outputs
            .iter()
            .position(|s| *s == group.producer)
            .and_then(|k| producer_cand.replacement.outputs.get(k).copied())
            .ok_or_else(|| fail(external[0].0.operator))?;
        let produced = producer_cand.replacement.operators[pi].supported_output_channels(ps);

        let mut accepted = Vec::with_capacity(external.len());
        let mut consumers = Vec::with_capacity(external.len());
        for (slot, cc) in &external {
            let cand = &self.candidates[*cc];
            let (ci, cs) = cand
                .matched
                .inputs
                .iter()
                .position(|s| s == slot)
                .and_then(|b| cand.replacement.inputs.get(b).copied())
                .ok_or_else(|| fail(slot.operator))?;
            let broadcast = self
                .plan
                .get(slot.operator)
                .ok()
                .and_then(|o| o.inputs().get(slot.slot).map(|s| s.broadcast))
                .unwrap_or(false);
            accepted.push(accepted_on(
                cand.replacement.operators[ci].supported_input_channels(cs),
                broadcast,
            ));
            let cross = cand.replacement.operators[ci].platform()
                != producer_cand.replacement.operators[pi].platform();
            consumers.push((*cc, ci, cs, cross));
        }

        let costs = &self.conversion_costs[g];
        let step_cost = |conv: &ChannelConversion| {
            CONVERSIONS
                .iter()
                .position(|c| c == conv)
                .map_or(f64::INFINITY, |i| costs[i])
        };
        let resolution =
            resolve_group(&produced, &accepted, &step_cost).map_err(|i| fail(external[i].0.operator))?;
        Ok(Some(GroupOutcome {
            resolution,
            producer: (pc, pi, ps),
            consumers,
        }))
    }

    /// Groups that become fully assigned once `pos` is covered.
    fn completed_groups(&self, positions: &[usize], assign: &[Option<usize>], counted: &[bool]) -> Vec<usize> {
        let mut out = Vec::new();
        for &pos in positions {
            for &g in &self.touching[pos] {
                if counted[g] || out.contains(&g) {
                    continue;
                }
                let group = &self.groups[g];
                let done = std::iter::once(group.producer.operator)
                    .chain(group.consumers.iter().map(|c| c.operator))
                    .all(|op| self.pos(op).and_then(|p| assign[p]).is_some());
                if done {
                    out.push(g);
                }
            }
        }
        out
    }

    pub fn solve(&self) -> Result<Solution, OptimizeError> {
        let uncovered = self.uncovered();
        if !uncovered.is_empty() {
            return Err(OptimizeError::Unsatisfiable { uncovered });
        }
        if self.candidates.len() <= self.config.exhaustive_candidate_limit {
            debug!(candidates = self.candidates.len(), "optimizing with branch-and-bound");
            self.branch_and_bound()
        } else {
            debug!(
                candidates = self.candidates.len(),
                limit = self.config.exhaustive_candidate_limit,
                "candidate count above limit; optimizing greedily"
            );
            self.greedy()
        }
    }

    fn branch_and_bound(&self) -> Result<Solution, OptimizeError> {
        let mut search = Search {
            problem: self,
            best: None,
            stuck: None,
            channel_failure: None,
            visited: 0,
        };
        let mut assign = vec![None; self.order.len()];
        let mut counted = vec![false; self.groups.len()];
        let mut chosen = Vec::new();
        search.descend(&mut assign, &mut counted, &mut chosen, 0.0);
        trace!(visited = search.visited, "branch-and-bound finished");

        match search.best {
            Some(solution) => Ok(solution),
            None => Err(search.failure()),
        }
    }

    fn greedy(&self) -> Result<Solution, OptimizeError> {
        let mut assign: Vec<Option<usize>> = vec![None; self.order.len()];
        let mut counted = vec![false; self.groups.len()];
        let mut chosen = Vec::new();
        let mut last_failure = None;

        for pos in 0..self.order.len() {
            if assign[pos].is_some() {
                continue;
            }
            let mut best: Option<(f64, usize, usize, Vec<usize>)> = None;
            for &ci in &self.covering[pos] {
                let Some(positions) = self.place(ci, &mut assign) else {
                    continue;
                };
                let completed = self.completed_groups(&positions, &assign, &counted);
                let channels: Result<f64, ChannelFailure> = completed.iter().try_fold(0.0, |acc, g| {
                    Ok(acc + self.evaluate_group(*g, &assign)?.map_or(0.0, |o| o.resolution.cost))
                });
                for p in &positions {
                    assign[*p] = None;
                }
                let channels = match channels {
                    Ok(c) => c,
                    Err(f) => {
                        last_failure = Some(f);
                        continue;
                    }
                };
                let cand = &self.candidates[ci];
                let share = (cand.cost + channels) / cand.covered.len().max(1) as f64;
                let rank = self.config.platform_rank(cand.platform);
                let better = match &best {
                    None => true,
                    Some((s, r, _, _)) => {
                        if same_cost(share, *s) {
                            rank < *r
                        } else {
                            share < *s
                        }
                    }
                };
                if better {
                    best = Some((share, rank, ci, completed));
                }
            }
            let Some((_, _, ci, completed)) = best else {
                return Err(match last_failure {
                    Some(f) => OptimizeError::NoCompatibleChannel {
                        producer: f.producer,
                        consumer: f.consumer,
                    },
                    None => OptimizeError::Unsatisfiable {
                        uncovered: vec![self.name_at(pos)],
                    },
                });
            };
            self.place(ci, &mut assign);
            for g in completed {
                counted[g] = true;
            }
            chosen.push(ci);
        }

        let assign: Vec<usize> = assign.into_iter().flatten().collect();
        let score = self.score_assignment(&assign).map_err(|f| OptimizeError::NoCompatibleChannel {
            producer: f.producer,
            consumer: f.consumer,
        })?;
        Ok(Solution {
            selection: chosen,
            score,
        })
    }

    /// Assign candidate `ci` to all positions it covers; `None` (and no
    /// change) if any is already taken.
    fn place(&self, ci: usize, assign: &mut [Option<usize>]) -> Option<Vec<usize>> {
        let positions: Vec<usize> = self.candidates[ci]
            .covered
            .iter()
            .map(|op| self.pos(*op))
            .collect::<Option<_>>()?;
        if positions.iter().any(|p| assign[*p].is_some()) {
            return None;
        }
        for p in &positions {
            assign[*p] = Some(ci);
        }
        Some(positions)
    }

    /// Turn a solution into an execution plan of copied bound operators.
    pub fn build(&self, solution: &Solution, epoch: Epoch) -> Result<ExecutionPlan, OptimizeError> {
        let assign = self
            .assignment(&solution.selection)
            .ok_or_else(|| OptimizeError::Internal("selection is not an exact cover".into()))?;
        let partial: Vec<Option<usize>> = assign.iter().copied().map(Some).collect();

        // Candidates in order of their first covered operator.
        let mut chosen: Vec<usize> = Vec::new();
        for ci in &assign {
            if !chosen.contains(ci) {
                chosen.push(*ci);
            }
        }

        let mut tasks = Vec::new();
        let mut task_of: BTreeMap<(usize, usize), TaskId> = BTreeMap::new();
        for &ci in &chosen {
            let cand = &self.candidates[ci];
            for (oi, op) in cand.replacement.operators.iter().enumerate() {
                let id = TaskId::new(tasks.len() as u64);
                task_of.insert((ci, oi), id);
                tasks.push(Task {
                    id,
                    operator: op.copy(),
                    origin: cand.covered.iter().copied().collect(),
                    candidate: cand.id,
                    rule: cand.rule_name.clone(),
                    estimate: cand.estimates.get(oi).copied(),
                });
            }
        }
        let task = |ci: usize, oi: usize| {
            task_of
                .get(&(ci, oi))
                .copied()
                .ok_or_else(|| OptimizeError::Internal(format!("no task for candidate {ci} operator {oi}")))
        };

        let mut junctions = Vec::new();
        for &ci in &chosen {
            let cand = &self.candidates[ci];
            for ((fi, fs), (ti, ts)) in &cand.replacement.links {
                let produced = cand.replacement.operators[*fi].supported_output_channels(*fs);
                let accepted = vec![cand.replacement.operators[*ti].supported_input_channels(*ts)];
                let resolution = resolve_group(&produced, &accepted, &|_| 1.0).map_err(|_| {
                    OptimizeError::NoCompatibleChannel {
                        producer: cand.replacement.operators[*fi].name().to_string(),
                        consumer: cand.replacement.operators[*ti].name().to_string(),
                    }
                })?;
                let path = resolution.paths.into_iter().next().unwrap_or_else(|| crate::channels::ConversionPath {
                    steps: Vec::new(),
                    cost: 0.0,
                });
                junctions.push(Junction {
                    producer: TaskSlot::new(task(ci, *fi)?, *fs),
                    descriptor: resolution.descriptor,
                    targets: vec![JunctionTarget {
                        consumer: TaskSlot::new(task(ci, *ti)?, *ts),
                        conversions: path.steps,
                        cross_platform: false,
                        cost: 0.0,
                    }],
                });
            }
        }

        for g in 0..self.groups.len() {
            let outcome = self.evaluate_group(g, &partial).map_err(|f| OptimizeError::NoCompatibleChannel {
                producer: f.producer,
                consumer: f.consumer,
            })?;
            let Some(outcome) = outcome else { continue };
            let (pc, pi, ps) = outcome.producer;
            let mut targets = Vec::with_capacity(outcome.consumers.len());
            for ((cc, ci, cs, cross), path) in outcome.consumers.iter().zip(outcome.resolution.paths) {
                targets.push(JunctionTarget {
                    consumer: TaskSlot::new(task(*cc, *ci)?, *cs),
                    conversions: path.steps,
                    cross_platform: *cross,
                    cost: path.cost,
                });
            }
            junctions.push(Junction {
                producer: TaskSlot::new(task(pc, pi)?, ps),
                descriptor: outcome.resolution.descriptor,
                targets,
            });
        }

        let plan = ExecutionPlan::new(tasks, junctions, solution.score.clone(), epoch)?;
        info!(
            tasks = plan.tasks().len(),
            cost = solution.score.cost,
            cross_platform = solution.score.cross_platform,
            %epoch,
            "execution plan selected"
        );
        Ok(plan)
    }
}

struct Search<'p, 'a> {
    problem: &'p OptimizationProblem<'a>,
    best: Option<Solution>,
    stuck: Option<usize>,
    channel_failure: Option<ChannelFailure>,
    visited: u64,
}

impl Search<'_, '_> {
    fn descend(
        &mut self,
        assign: &mut Vec<Option<usize>>,
        counted: &mut Vec<bool>,
        chosen: &mut Vec<usize>,
        cost_so_far: f64,
    ) {
        self.visited += 1;
        let p = self.problem;
        let Some(pos) = assign.iter().position(Option::is_none) else {
            let full: Vec<usize> = assign.iter().flatten().copied().collect();
            match p.score_assignment(&full) {
                Ok(score) => {
                    let better = self
                        .best
                        .as_ref()
                        .map_or(true, |b| score.compare(&b.score) == Ordering::Less);
                    if better {
                        self.best = Some(Solution {
                            selection: chosen.clone(),
                            score,
                        });
                    }
                }
                Err(f) => self.channel_failure = Some(f),
            }
            return;
        };

        let mut placed_any = false;
        for &ci in &p.covering[pos] {
            let Some(positions) = p.place(ci, assign) else {
                continue;
            };
            placed_any = true;

            let completed = p.completed_groups(&positions, assign, counted);
            let mut cost = cost_so_far + p.candidates[ci].cost;
            let mut feasible = true;
            for g in &completed {
                match p.evaluate_group(*g, assign) {
                    Ok(outcome) => cost += outcome.map_or(0.0, |o| o.resolution.cost),
                    Err(f) => {
                        self.channel_failure = Some(f);
                        feasible = false;
                        break;
                    }
                }
            }

            let bound = cost
                + assign
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.is_none())
                    .map(|(i, _)| p.lower_share[i])
                    .sum::<f64>();
            let pruned = self
                .best
                .as_ref()
                .is_some_and(|b| bound > b.score.cost && !same_cost(bound, b.score.cost));

            if feasible && !pruned {
                for g in &completed {
                    counted[*g] = true;
                }
                chosen.push(ci);
                self.descend(assign, counted, chosen, cost);
                chosen.pop();
                for g in &completed {
                    counted[*g] = false;
                }
            }
            for q in &positions {
                assign[*q] = None;
            }
        }
        if !placed_any {
            self.stuck = Some(self.stuck.map_or(pos, |s| s.max(pos)));
        }
    }

    fn failure(&self) -> OptimizeError {
        if let Some(f) = &self.channel_failure {
            return OptimizeError::NoCompatibleChannel {
                producer: f.producer.clone(),
                consumer: f.consumer.clone(),
            };
        }
        let uncovered = self
            .stuck
            .map(|pos| vec![self.problem.name_at(pos)])
            .unwrap_or_default();
        OptimizeError::Unsatisfiable { uncovered }
    }
}

/// Solve and build in one step.
pub fn optimize(
    plan: &OperatorPlan,
    candidates: &[Candidate],
    estimator: &LoadProfileEstimator,
    stats: &PlanStatistics,
    config: &OptimizerConfig,
    epoch: Epoch,
) -> Result<ExecutionPlan, OptimizeError> {
    let problem = OptimizationProblem::new(plan, candidates, estimator, stats, config)?;
    let solution = problem.solve()?;
    problem.build(&solution, epoch)
}
