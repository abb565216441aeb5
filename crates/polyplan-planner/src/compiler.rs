//! Facade over the whole compile path:
//! validate -> propagate cardinalities -> match -> optimize.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use polyplan_core::config::EngineConfig;
use polyplan_core::id::Epoch;
use polyplan_core::lineage::LineageGraph;
use polyplan_core::plan::OperatorPlan;
use polyplan_estimator::{propagate_cardinalities, CardinalityHints, LoadProfileEstimator, PlanStatistics};

use crate::error::CompileError;
use crate::execution::ExecutionPlan;
use crate::matcher::{Candidate, MappingEngine};
use crate::optimizer::OptimizationProblem;
use crate::rule::RuleRegistry;

pub struct PlanCompiler {
    registry: Arc<RuleRegistry>,
    estimator: LoadProfileEstimator,
    config: EngineConfig,
    epoch: AtomicU64,
}

impl PlanCompiler {
    pub fn new(registry: Arc<RuleRegistry>, estimator: LoadProfileEstimator, config: EngineConfig) -> Self {
        Self {
            registry,
            estimator,
            config,
            epoch: AtomicU64::new(Epoch::INITIAL.get()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn estimator(&self) -> &LoadProfileEstimator {
        &self.estimator
    }

    /// Allocate the next optimization round.
    pub fn next_epoch(&self) -> Epoch {
        Epoch::new(self.epoch.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Validated statistics and all candidates for `plan`.
    pub fn candidates(
        &self,
        plan: &OperatorPlan,
        hints: &CardinalityHints,
        epoch: Epoch,
    ) -> Result<(PlanStatistics, Vec<Candidate>), CompileError> {
        plan.validate()?;
        let stats = propagate_cardinalities(plan, hints, &self.config.estimator)?;
        let engine = MappingEngine::new(&self.registry, &self.estimator, &self.config.optimizer.cost_weights);
        let candidates = engine.match_all(plan, &stats, epoch)?;
        Ok((stats, candidates))
    }

    pub fn compile(&self, plan: &OperatorPlan, hints: &CardinalityHints) -> Result<ExecutionPlan, CompileError> {
        let epoch = self.next_epoch();
        debug!(operators = plan.len(), %epoch, "compiling plan");
        let (stats, candidates) = self.candidates(plan, hints, epoch)?;
        let problem = OptimizationProblem::new(plan, &candidates, &self.estimator, &stats, &self.config.optimizer)?;
        let solution = problem.solve()?;
        let exec = problem.build(&solution, epoch)?;
        info!(
            operators = plan.len(),
            candidates = candidates.len(),
            tasks = exec.tasks().len(),
            cost = exec.cost(),
            "plan compiled"
        );
        Ok(exec)
    }

    /// Feed a sealed run back into the estimator.
    pub fn calibrate(&mut self, lineage: &LineageGraph) -> usize {
        self.estimator.calibrate(lineage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimizeError;
    use crate::testing::{mock_registry, mock_rule, spec_source};
    use polyplan_core::channel::ChannelDescriptor;
    use polyplan_core::plan::{LogicalOp, OperatorKind};
    use polyplan_core::platform::Platform;

    fn source_filter_sink() -> OperatorPlan {
        let mut plan = OperatorPlan::new();
        let src = plan.add_named("source", LogicalOp::CollectionSource { records: vec![] });
        let f = plan.add_named(
            "filter",
            LogicalOp::Filter {
                predicate: "a > 1".into(),
            },
        );
        let sink = plan.add_named(
            "sink",
            LogicalOp::Sink {
                destination: "memory://out".into(),
            },
        );
        plan.chain(src, f).unwrap();
        plan.chain(f, sink).unwrap();
        plan
    }

    fn compiler(rules: RuleRegistry, specs: &[(&str, f64)]) -> PlanCompiler {
        let estimator = LoadProfileEstimator::new(spec_source(specs), EngineConfig::default().estimator);
        PlanCompiler::new(Arc::new(rules), estimator, EngineConfig::default())
    }

    #[test]
    fn single_platform_plan_uses_direct_channels() {
        let kinds = [OperatorKind::CollectionSource, OperatorKind::Filter, OperatorKind::Sink];
        let c = compiler(mock_registry(&kinds, Platform::Local), &[]);
        let exec = c.compile(&source_filter_sink(), &CardinalityHints::default()).unwrap();
        assert_eq!(exec.tasks().len(), 3);
        assert!(exec.tasks().iter().all(|t| t.platform() == Platform::Local));
        assert_eq!(exec.junctions().len(), 2);
        assert!(exec
            .junctions()
            .iter()
            .all(|j| j.targets.iter().all(|t| t.conversions.is_empty() && !t.cross_platform)));
    }

    #[test]
    fn missing_sink_rule_is_named() {
        let kinds = [OperatorKind::CollectionSource, OperatorKind::Filter];
        let c = compiler(mock_registry(&kinds, Platform::Local), &[]);
        let err = c.compile(&source_filter_sink(), &CardinalityHints::default()).unwrap_err();
        match err {
            CompileError::Optimize(OptimizeError::Unsatisfiable { uncovered }) => {
                assert_eq!(uncovered, vec!["sink".to_string()])
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn cheaper_platform_wins() {
        let collection = vec![ChannelDescriptor::Collection];
        let rules = RuleRegistry::builder()
            .rules([
                mock_rule(OperatorKind::CollectionSource, Platform::Local, collection.clone()),
                mock_rule(OperatorKind::Sink, Platform::Local, collection.clone()),
                mock_rule(OperatorKind::Filter, Platform::Local, collection.clone()),
                mock_rule(OperatorKind::Filter, Platform::Distributed, collection),
            ])
            .build()
            .unwrap();
        let c = compiler(rules, &[("local.filter.main", 10.0), ("distributed.filter.main", 5.0)]);
        let exec = c.compile(&source_filter_sink(), &CardinalityHints::default()).unwrap();
        let filter = exec.tasks().iter().find(|t| t.name() == "filter").unwrap();
        assert_eq!(filter.platform(), Platform::Distributed);
    }

    #[test]
    fn epochs_increase_but_structure_repeats() {
        let kinds = [OperatorKind::CollectionSource, OperatorKind::Filter, OperatorKind::Sink];
        let c = compiler(mock_registry(&kinds, Platform::Local), &[]);
        let plan = source_filter_sink();
        let a = c.compile(&plan, &CardinalityHints::default()).unwrap();
        let b = c.compile(&plan, &CardinalityHints::default()).unwrap();
        assert!(b.epoch() > a.epoch());
        assert_eq!(a.structure(), b.structure());
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
