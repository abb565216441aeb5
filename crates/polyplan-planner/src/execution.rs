//! The finalized, platform-bound task graph.
//!
//! Tasks own copies of the bound operators; junctions carry each task
//! output to its consumers, with the conversions to apply on the way.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use polyplan_core::channel::{ChannelConversion, ChannelDescriptor};
use polyplan_core::fingerprint::{Fingerprint, FingerprintDomain};
use polyplan_core::id::{CandidateId, Epoch, OperatorId, TaskId};
use polyplan_core::operator::ExecutionOperator;
use polyplan_core::platform::Platform;

use crate::error::OptimizeError;
use crate::matcher::OperatorEstimate;
use crate::optimizer::SelectionScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskSlot {
    pub task: TaskId,
    pub slot: usize,
}

impl TaskSlot {
    pub fn new(task: TaskId, slot: usize) -> Self {
        Self { task, slot }
    }
}

impl fmt::Display for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}.{}", self.task.get(), self.slot)
    }
}

#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub operator: Box<dyn ExecutionOperator>,
    /// Logical operators this task (with its siblings) replaces.
    pub origin: Vec<OperatorId>,
    pub candidate: CandidateId,
    pub rule: String,
    pub estimate: Option<OperatorEstimate>,
}

impl Task {
    pub fn platform(&self) -> Platform {
        self.operator.platform()
    }

    pub fn name(&self) -> &str {
        self.operator.name()
    }
}

impl Clone for Task {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            operator: self.operator.copy(),
            origin: self.origin.clone(),
            candidate: self.candidate,
            rule: self.rule.clone(),
            estimate: self.estimate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JunctionTarget {
    pub consumer: TaskSlot,
    /// Applied in order to the producer's descriptor.
    pub conversions: Vec<&'static ChannelConversion>,
    pub cross_platform: bool,
    pub cost: f64,
}

/// One task output and where it goes.
#[derive(Debug, Clone, Serialize)]
pub struct Junction {
    pub producer: TaskSlot,
    pub descriptor: ChannelDescriptor,
    pub targets: Vec<JunctionTarget>,
}

impl Junction {
    /// More than one consumer: the driver hands each a duplicate.
    pub fn duplicates(&self) -> bool {
        self.targets.len() > 1
    }
}

/// Epoch-free shape of an execution plan, for comparing optimizer runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStructure {
    pub tasks: Vec<TaskShape>,
    pub junctions: Vec<JunctionShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskShape {
    pub kind: String,
    pub platform: Platform,
    pub name: String,
    pub origin: Vec<OperatorId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JunctionShape {
    pub producer: TaskSlot,
    pub descriptor: ChannelDescriptor,
    pub targets: Vec<(TaskSlot, Vec<&'static str>)>,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    tasks: Vec<Task>,
    junctions: Vec<Junction>,
    order: Vec<TaskId>,
    score: SelectionScore,
    epoch: Epoch,
}

impl ExecutionPlan {
    /// Assemble and verify; a plan that fails verification is an optimizer bug.
    pub fn new(
        tasks: Vec<Task>,
        junctions: Vec<Junction>,
        score: SelectionScore,
        epoch: Epoch,
    ) -> Result<Self, OptimizeError> {
        let mut plan = Self {
            tasks,
            junctions,
            order: Vec::new(),
            score,
            epoch,
        };
        plan.order = plan.verify()?;
        Ok(plan)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index())
    }

    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    /// Tasks in dependency order.
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn score(&self) -> &SelectionScore {
        &self.score
    }

    pub fn cost(&self) -> f64 {
        self.score.cost
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn junction_from(&self, producer: TaskSlot) -> Option<&Junction> {
        self.junctions.iter().find(|j| j.producer == producer)
    }

    pub fn platforms(&self) -> BTreeSet<Platform> {
        self.tasks.iter().map(Task::platform).collect()
    }

    /// Check connectivity and acyclicity; returns a topological task order.
    pub fn verify(&self) -> Result<Vec<TaskId>, OptimizeError> {
        let fault = |msg: String| Err(OptimizeError::Internal(msg));
        let mut fed: BTreeMap<TaskSlot, usize> = BTreeMap::new();
        let mut produced: BTreeMap<TaskSlot, usize> = BTreeMap::new();

        for j in &self.junctions {
            let Some(producer) = self.task(j.producer.task) else {
                return fault(format!("junction from unknown {}", j.producer));
            };
            if j.targets.is_empty() {
                return fault(format!("junction from {} has no target", j.producer));
            }
            if !producer
                .operator
                .supported_output_channels(j.producer.slot)
                .contains(&j.descriptor)
            {
                return fault(format!("{} cannot produce {}", j.producer, j.descriptor));
            }
            *produced.entry(j.producer).or_default() += 1;
            for t in &j.targets {
                let Some(consumer) = self.task(t.consumer.task) else {
                    return fault(format!("junction into unknown {}", t.consumer));
                };
                let mut at = j.descriptor;
                for conv in &t.conversions {
                    if conv.from != at {
                        return fault(format!("conversion chain into {} is broken", t.consumer));
                    }
                    at = conv.to;
                }
                if !consumer
                    .operator
                    .supported_input_channels(t.consumer.slot)
                    .contains(&at)
                {
                    return fault(format!("{} cannot consume {}", t.consumer, at));
                }
                *fed.entry(t.consumer).or_default() += 1;
            }
        }

        for task in &self.tasks {
            for slot in 0..task.operator.num_inputs() {
                let s = TaskSlot::new(task.id, slot);
                if fed.get(&s).copied() != Some(1) {
                    return fault(format!("input {s} ({}) is not fed exactly once", task.name()));
                }
            }
            for slot in 0..task.operator.num_outputs() {
                let s = TaskSlot::new(task.id, slot);
                if produced.get(&s).copied() != Some(1) {
                    return fault(format!("output {s} ({}) has no single junction", task.name()));
                }
            }
        }

        let mut in_degree: BTreeMap<TaskId, usize> = self.tasks.iter().map(|t| (t.id, 0)).collect();
        for j in &self.junctions {
            for t in &j.targets {
                *in_degree.entry(t.consumer.task).or_default() += 1;
            }
        }
        let mut ready: BTreeSet<TaskId> = in_degree
            .iter()
            .filter_map(|(id, d)| (*d == 0).then_some(*id))
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for j in self.junctions.iter().filter(|j| j.producer.task == id) {
                for t in &j.targets {
                    if let Some(d) = in_degree.get_mut(&t.consumer.task) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(t.consumer.task);
                        }
                    }
                }
            }
        }
        if order.len() != self.tasks.len() {
            return fault("task graph is cyclic".into());
        }
        Ok(order)
    }

    pub fn structure(&self) -> PlanStructure {
        PlanStructure {
            tasks: self
                .tasks
                .iter()
                .map(|t| TaskShape {
                    kind: t.operator.kind().to_string(),
                    platform: t.platform(),
                    name: t.name().to_string(),
                    origin: t.origin.clone(),
                })
                .collect(),
            junctions: self
                .junctions
                .iter()
                .map(|j| JunctionShape {
                    producer: j.producer,
                    descriptor: j.descriptor,
                    targets: j
                        .targets
                        .iter()
                        .map(|t| (t.consumer, t.conversions.iter().map(|c| c.spec_key).collect()))
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn fingerprint(&self) -> polyplan_core::error::Result<Fingerprint> {
        Fingerprint::of(FingerprintDomain::ExecutionPlan, &self.structure())
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "execution plan ({}, cost {:.3}, {} cross-platform link(s))",
            self.epoch, self.score.cost, self.score.cross_platform
        )?;
        for id in &self.order {
            let Some(t) = self.task(*id) else { continue };
            let origin: Vec<String> = t.origin.iter().map(|o| format!("#{}", o.get())).collect();
            write!(
                f,
                "  task{} {}/{} '{}' <- [{}] via {}",
                t.id.get(),
                t.platform(),
                t.operator.kind(),
                t.name(),
                origin.join(", "),
                t.rule
            )?;
            if let Some(e) = &t.estimate {
                write!(
                    f,
                    "  est {:.3}ms (confidence {:.2})",
                    e.prepare.time_ms.expected() + e.main.time_ms.expected(),
                    e.main.confidence
                )?;
            }
            writeln!(f)?;
        }
        for j in &self.junctions {
            for t in &j.targets {
                let via: Vec<&str> = t.conversions.iter().map(|c| c.spec_key).collect();
                write!(f, "  {} -> {} [{}]", j.producer, t.consumer, j.descriptor)?;
                if !via.is_empty() {
                    write!(f, " via {}", via.join(" > "))?;
                }
                if j.duplicates() {
                    f.write_str(" (dup)")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
