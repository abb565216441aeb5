//! Execution driver: walk an `ExecutionPlan` in dependency order, hand each
//! task its input channel instances, and route what it produces through the
//! plan's junctions.
//!
//! Lineage per task:
//!   prepare -> main -> channel (one per produced instance) -> conversion...
//! Input channels (or the last conversion applied to them) are
//! predecessors of the consuming task's `main` node.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::id::{ChannelId, LineageId, TaskId};
use polyplan_core::lineage::{ExecutionLineageNode, LineageBuilder, LineageGraph, LineagePhase, RealizedCost};
use polyplan_core::operator::{ExecutionContext, OperatorContext, ResultStore};
use polyplan_planner::{ExecutionPlan, Junction, Task, TaskSlot};

use crate::error::{ExecError, Result};
use crate::sink::LineageSink;

/// Audit record of one channel instance the driver created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedChannel {
    pub id: ChannelId,
    pub descriptor: ChannelDescriptor,
    pub producer: TaskId,
    /// Set for instances made while routing (duplicates and conversions).
    pub consumer: Option<TaskSlot>,
}

pub struct Driver {
    ctx: ExecutionContext,
    sink: Option<Box<dyn LineageSink>>,
    created: Vec<CreatedChannel>,
}

impl Driver {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self {
            ctx,
            sink: None,
            created: Vec::new(),
        }
    }

    /// Persist every sealed graph through `sink`.
    pub fn with_sink(mut self, sink: Box<dyn LineageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// `memory://` outputs of the last run.
    pub fn results(&self) -> &ResultStore {
        &self.ctx.results
    }

    /// Channel instances created by the last run, in creation order.
    pub fn created_channels(&self) -> &[CreatedChannel] {
        &self.created
    }

    /// Run `plan` once. Any operator fault aborts the whole run.
    pub fn execute(&mut self, plan: &ExecutionPlan) -> Result<LineageGraph> {
        self.ctx.run_id = Uuid::new_v4();
        self.ctx.results = ResultStore::new();
        self.created.clear();

        let fingerprint = plan
            .fingerprint()
            .map_err(|e| ExecError::Internal(format!("cannot fingerprint plan: {e}")))?;
        let started_ms = now_millis();
        info!(
            run = %self.ctx.run_id,
            plan = %fingerprint.short(),
            tasks = plan.tasks().len(),
            "run started"
        );

        let mut run = Run {
            lineage: LineageBuilder::new(),
            pending: BTreeMap::new(),
        };
        for task_id in plan.order() {
            let task = plan
                .task(*task_id)
                .ok_or_else(|| fault(plan, format!("ordered task {task_id} does not exist")))?;
            self.run_task(plan, task, &mut run)?;
        }
        if let Some((slot, _)) = run.pending.iter().next() {
            return Err(fault(plan, format!("channel for {slot} was never consumed")));
        }

        let graph = run
            .lineage
            .seal(self.ctx.run_id, fingerprint.to_hex(), started_ms, now_millis());
        info!(
            run = %self.ctx.run_id,
            nodes = graph.len(),
            channels = self.created.len(),
            "run finished"
        );
        if let Some(sink) = &self.sink {
            sink.persist(&graph)?;
        }
        Ok(graph)
    }

    fn run_task(&mut self, plan: &ExecutionPlan, task: &Task, run: &mut Run) -> Result<()> {
        let op = &task.operator;

        let mut inputs = Vec::with_capacity(op.num_inputs());
        for slot in 0..op.num_inputs() {
            let at = TaskSlot::new(task.id, slot);
            let instance = run
                .pending
                .remove(&at)
                .ok_or_else(|| fault(plan, format!("input {at} of '{}' was never produced", op.name())))?;
            if !instance.is_produced() {
                return Err(fault(plan, format!("input {at} of '{}' is empty", op.name())));
            }
            inputs.push(instance);
        }
        let upstream: Vec<LineageId> = inputs.iter().filter_map(ChannelInstance::lineage).collect();

        let mut outputs = Vec::with_capacity(op.num_outputs());
        for slot in 0..op.num_outputs() {
            let at = TaskSlot::new(task.id, slot);
            let junction = plan
                .junction_from(at)
                .ok_or_else(|| fault(plan, format!("output {at} of '{}' has no junction", op.name())))?;
            outputs.push(self.create(junction.descriptor, task.id, None));
        }

        let channels = describe(&inputs, &outputs);
        let op_ctx = OperatorContext {
            task: task.id,
            name: op.name().to_string(),
            keys: op.load_profile_keys(),
            prepare_estimate: task.estimate.map(|e| e.prepare),
            main_estimate: task.estimate.map(|e| e.main),
        };
        debug!(task = %task.id, operator = op.name(), platform = %op.platform(), %channels, "evaluating");

        let evaluation = op
            .evaluate(inputs, outputs, &self.ctx, &op_ctx)
            .map_err(|source| {
                error!(task = %task.id, operator = op.name(), error = %source, "operator failed; aborting run");
                ExecError::Execution {
                    task: task.id,
                    operator: op.name().to_string(),
                    platform: op.platform(),
                    channels,
                    source,
                }
            })?;

        let prepare = run.lineage.add(evaluation.prepare);
        let main = run.lineage.add(evaluation.main);
        run.lineage.add_predecessor(main, prepare);
        for up in upstream {
            run.lineage.add_predecessor(main, up);
        }

        if evaluation.produced.len() != op.num_outputs() {
            return Err(fault(
                plan,
                format!(
                    "'{}' produced {} channel(s), declared {}",
                    op.name(),
                    evaluation.produced.len(),
                    op.num_outputs()
                ),
            ));
        }
        for (slot, mut instance) in evaluation.produced.into_iter().enumerate() {
            if !instance.is_produced() {
                return Err(fault(plan, format!("'{}' left output {slot} empty", op.name())));
            }
            let mut node = ExecutionLineageNode::new(task.id, op.name(), LineagePhase::Channel)
                .with_channel(instance.id());
            node.realized = Some(RealizedCost {
                elapsed_ms: 0.0,
                input_cardinality: instance.cardinality(),
                output_cardinality: instance.cardinality(),
                output_bytes: instance.approx_bytes(),
            });
            let channel_node = run.lineage.add(node);
            run.lineage.add_predecessor(channel_node, main);
            instance.set_lineage(channel_node);

            let junction = plan
                .junction_from(TaskSlot::new(task.id, slot))
                .ok_or_else(|| fault(plan, format!("output {slot} of '{}' has no junction", op.name())))?;
            self.route(plan, junction, instance, run)?;
        }
        Ok(())
    }

    /// Deliver `instance` to every junction target, duplicating on fan-out
    /// and applying each target's conversions in order.
    fn route(&mut self, plan: &ExecutionPlan, junction: &Junction, instance: ChannelInstance, run: &mut Run) -> Result<()> {
        let Some((last, rest)) = junction.targets.split_last() else {
            return Err(fault(plan, format!("junction from {} has no targets", junction.producer)));
        };

        let mut deliveries = Vec::with_capacity(junction.targets.len());
        for target in rest {
            let id = self.record(instance.descriptor(), instance.producer(), Some(target.consumer));
            deliveries.push((target, instance.duplicate(id)));
        }
        deliveries.push((last, instance));
        if junction.duplicates() {
            trace!(producer = %junction.producer, copies = deliveries.len(), "duplicated channel");
        }

        for (target, mut instance) in deliveries {
            for conversion in &target.conversions {
                let started = Instant::now();
                let rows = instance.cardinality();
                let upstream = instance.lineage();
                let id = self.record(conversion.to, instance.producer(), Some(target.consumer));
                instance = instance
                    .convert(conversion, id, self.ctx.config.distributed_parallelism)
                    .map_err(|e| fault(plan, format!("conversion into {}: {e}", target.consumer)))?;

                let mut node = ExecutionLineageNode::new(target.consumer.task, conversion.spec_key, LineagePhase::Conversion)
                    .with_spec(conversion.spec_key, None)
                    .with_channel(id);
                node.realized = Some(RealizedCost {
                    elapsed_ms: started.elapsed().as_secs_f64() * 1e3,
                    input_cardinality: rows,
                    output_cardinality: instance.cardinality(),
                    output_bytes: instance.approx_bytes(),
                });
                let conv_node = run.lineage.add(node);
                if let Some(up) = upstream {
                    run.lineage.add_predecessor(conv_node, up);
                }
                instance.set_lineage(conv_node);
                trace!(key = conversion.spec_key, consumer = %target.consumer, rows, "converted channel");
            }
            if run.pending.insert(target.consumer, instance).is_some() {
                return Err(fault(plan, format!("{} is fed twice", target.consumer)));
            }
        }
        Ok(())
    }

    fn create(&mut self, descriptor: ChannelDescriptor, producer: TaskId, consumer: Option<TaskSlot>) -> ChannelInstance {
        let id = self.record(descriptor, producer, consumer);
        ChannelInstance::new(id, descriptor, producer)
    }

    fn record(&mut self, descriptor: ChannelDescriptor, producer: TaskId, consumer: Option<TaskSlot>) -> ChannelId {
        let id = ChannelId::new(self.created.len() as u64);
        self.created.push(CreatedChannel {
            id,
            descriptor,
            producer,
            consumer,
        });
        id
    }
}

/// Per-run mutable state.
struct Run {
    lineage: LineageBuilder,
    /// Produced instances waiting for their consumer.
    pending: BTreeMap<TaskSlot, ChannelInstance>,
}

/// Internal faults carry the whole plan for diagnosis.
fn fault(plan: &ExecutionPlan, what: String) -> ExecError {
    error!(%what, "internal consistency fault");
    ExecError::Internal(format!("{what}\n{plan}"))
}

fn describe(inputs: &[ChannelInstance], outputs: &[ChannelInstance]) -> String {
    let list = |cs: &[ChannelInstance]| {
        cs.iter()
            .map(|c| format!("{}/{}", c.id(), c.descriptor()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("in [{}] out [{}]", list(inputs), list(outputs))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use polyplan_core::config::EngineConfig;
    use polyplan_core::plan::{LogicalOp, OperatorPlan};
    use polyplan_core::platform::Platform;
    use polyplan_core::types::{Record, Scalar};
    use polyplan_estimator::{CardinalityHints, LoadProfileEstimator};
    use polyplan_operators::{default_registry, default_specs};
    use polyplan_planner::PlanCompiler;

    fn compiler(priority: Vec<Platform>) -> PlanCompiler {
        let mut cfg = EngineConfig::default();
        cfg.optimizer.platform_priority = priority;
        cfg.distributed_parallelism = 3;
        let estimator = LoadProfileEstimator::new(Arc::new(default_specs().unwrap()), cfg.estimator.clone());
        PlanCompiler::new(Arc::new(default_registry().unwrap()), estimator, cfg)
    }

    fn numbers(n: i64) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("n", Scalar::I64(i))).collect()
    }

    /// source -> filter -> {sink a, sink b}
    fn fan_out() -> OperatorPlan {
        let mut plan = OperatorPlan::new();
        let src = plan.add_named("src", LogicalOp::CollectionSource { records: numbers(10) });
        let f = plan.add_named(
            "upper",
            LogicalOp::Filter {
                predicate: "n >= 5".into(),
            },
        );
        let a = plan.add_named(
            "a",
            LogicalOp::Sink {
                destination: "memory://a".into(),
            },
        );
        let b = plan.add_named(
            "b",
            LogicalOp::Sink {
                destination: "memory://b".into(),
            },
        );
        plan.chain(src, f).unwrap();
        plan.connect(f, 0, a, 0).unwrap();
        plan.connect(f, 0, b, 0).unwrap();
        plan
    }

    #[test]
    fn fan_out_delivers_a_copy_to_each_consumer() {
        let c = compiler(vec![Platform::Local, Platform::Distributed]);
        let exec = c.compile(&fan_out(), &CardinalityHints::default()).unwrap();
        let mut driver = Driver::new(ExecutionContext::new(c.config().clone()));
        let lineage = driver.execute(&exec).unwrap();

        assert_eq!(driver.results().get("a").map(|r| r.len()), Some(5));
        assert_eq!(driver.results().get("b").map(|r| r.len()), Some(5));
        assert!(driver.created_channels().iter().any(|c| c.consumer.is_some()));
        // 4 tasks x (prepare, main) + 2 produced channels, plus any conversions.
        assert!(lineage.len() >= 10);
        assert_eq!(lineage.phase(LineagePhase::Main).count(), 4);
    }

    #[test]
    fn main_node_precedes_its_channel() {
        let c = compiler(vec![Platform::Local, Platform::Distributed]);
        let exec = c.compile(&fan_out(), &CardinalityHints::default()).unwrap();
        let mut driver = Driver::new(ExecutionContext::new(c.config().clone()));
        let lineage = driver.execute(&exec).unwrap();
        for (id, node) in lineage.phase(LineagePhase::Channel) {
            let preds = lineage.predecessors(id);
            assert_eq!(preds.len(), 1);
            let main = lineage.node(preds[0]).unwrap();
            assert_eq!(main.phase, LineagePhase::Main);
            assert_eq!(main.task, node.task);
        }
    }

    #[test]
    fn each_run_gets_a_fresh_id_and_result_store() {
        let c = compiler(vec![Platform::Local, Platform::Distributed]);
        let exec = c.compile(&fan_out(), &CardinalityHints::default()).unwrap();
        let mut driver = Driver::new(ExecutionContext::new(c.config().clone()));
        let first = driver.execute(&exec).unwrap();
        let second = driver.execute(&exec).unwrap();
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(driver.results().get("a").map(|r| r.len()), Some(5));
        assert_eq!(first.shape(), second.shape());
    }
}
