//! Built-in mapping rules: one singleton rule per (platform, operator kind)
//! plus a distributed fusion of `filter -> project`.

use polyplan_core::id::Epoch;
use polyplan_core::operator::ExecutionOperator;
use polyplan_core::plan::{LogicalOp, Operator, OperatorKind};
use polyplan_core::platform::Platform;
use polyplan_planner::{
    OperatorPattern, PatternError, PlanTransformation, ReplacementSubplan, ReplacementSubplanFactory,
    RuleRegistry, SubplanPattern,
};

use crate::bound::Binding;
use crate::error::{OpError, Result};
use crate::filter::{Filter, FilterProject};
use crate::map::Map;
use crate::project::Project;
use crate::sink::Sink;
use crate::source::{CollectionSource, TextFileSource};
use crate::union::Union;

/// Bind one logical operator to `platform`.
pub fn bind(op: &Operator, platform: Platform, epoch: Epoch) -> Result<Box<dyn ExecutionOperator>> {
    let binding = Binding::of(op, platform, epoch);
    let bound: Box<dyn ExecutionOperator> = match op.op() {
        LogicalOp::CollectionSource { records } => Box::new(CollectionSource::new(binding, records.clone())),
        LogicalOp::TextFileSource { url } => Box::new(TextFileSource::new(binding, url.clone())),
        LogicalOp::Filter { predicate } => Box::new(Filter::new(binding, op, predicate)?),
        LogicalOp::Map { expr } => Box::new(Map::new(binding, expr)),
        LogicalOp::Project { columns } => Box::new(Project::new(binding, columns.clone())),
        LogicalOp::Union => Box::new(Union::new(binding)),
        LogicalOp::Sink { destination } => Box::new(Sink::new(binding, destination)?),
    };
    Ok(bound)
}

fn singleton_rule(kind: OperatorKind, platform: Platform) -> PlanTransformation {
    let mut node = OperatorPattern::new(kind.name(), kind);
    if kind == OperatorKind::Filter {
        node = node.allowing_broadcasts();
    }
    PlanTransformation::new(
        format!("{}.{}", platform, kind),
        SubplanPattern::singleton(node),
        ReplacementSubplanFactory::of_single_operator(move |op, epoch| {
            if op.kind() != kind {
                return Err(OpError::WrongKind {
                    expected: kind.name(),
                    got: op.kind().name(),
                }
                .to_string());
            }
            bind(op, platform, epoch).map_err(|e| e.to_string())
        }),
        platform,
    )
}

fn filter_project_rule() -> std::result::Result<PlanTransformation, PatternError> {
    let mut b = SubplanPattern::builder("filter_project");
    let f = b.node(OperatorPattern::new("filter", OperatorKind::Filter));
    let p = b.node(OperatorPattern::new("project", OperatorKind::Project));
    b.edge(f, 0, p, 0).input(f, 0).output(p, 0);
    let pattern = b.build()?;

    let factory = ReplacementSubplanFactory::new(|ops, epoch| {
        let [filter, project] = ops else {
            return Err(format!("expected filter and project, got {} operator(s)", ops.len()));
        };
        let (LogicalOp::Filter { predicate }, LogicalOp::Project { columns }) = (filter.op(), project.op()) else {
            return Err("fusion applied to operators of the wrong kind".into());
        };
        let binding = Binding::new(
            format!("{}+{}", filter.name(), project.name()),
            Platform::Distributed,
            epoch,
        );
        let fused = FilterProject::new(binding, predicate, columns.clone()).map_err(|e| e.to_string())?;
        Ok(ReplacementSubplan::single(Box::new(fused)))
    });

    Ok(PlanTransformation::new(
        "distributed.filter_project",
        pattern,
        factory,
        Platform::Distributed,
    ))
}

/// Every built-in rule, grouped by platform.
pub fn default_mappings() -> std::result::Result<Vec<PlanTransformation>, PatternError> {
    let mut rules = Vec::new();
    for platform in Platform::ALL {
        for kind in platform.capabilities().operator_kinds {
            rules.push(singleton_rule(*kind, platform));
        }
    }
    rules.push(filter_project_rule()?);
    Ok(rules)
}

pub fn default_registry() -> std::result::Result<RuleRegistry, PatternError> {
    RuleRegistry::builder().rules(default_mappings()?).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyplan_planner::find_matches;

    #[test]
    fn registry_covers_every_kind_on_every_platform() {
        let reg = default_registry().unwrap();
        let per_platform: usize = Platform::ALL
            .iter()
            .map(|p| p.capabilities().operator_kinds.len())
            .sum();
        assert_eq!(reg.len(), per_platform + 1);
    }

    #[test]
    fn fusion_matches_adjacent_filter_and_project() {
        let mut plan = polyplan_core::plan::OperatorPlan::new();
        let src = plan.add(LogicalOp::CollectionSource { records: vec![] });
        let f = plan.add(LogicalOp::Filter {
            predicate: "a > 1".into(),
        });
        let p = plan.add(LogicalOp::Project {
            columns: vec!["a".into()],
        });
        let sink = plan.add(LogicalOp::Sink {
            destination: "memory://x".into(),
        });
        plan.chain(src, f).unwrap();
        plan.chain(f, p).unwrap();
        plan.chain(p, sink).unwrap();

        let rule = filter_project_rule().unwrap();
        let m = find_matches(&rule.pattern, &plan);
        assert_eq!(m.len(), 1);
        let ops: Vec<&Operator> = m[0].nodes.iter().map(|id| plan.get(*id).unwrap()).collect();
        let r = rule.replace(&ops, 1, 1, Epoch::new(3)).unwrap();
        assert_eq!(r.operators[0].kind(), "filter_project");
        assert_eq!(r.operators[0].epoch(), Epoch::new(3));
        assert_eq!(r.operators[0].name(), "filter+project");
    }

    #[test]
    fn bad_predicate_fails_the_factory() {
        let mut plan = polyplan_core::plan::OperatorPlan::new();
        let f = plan.add(LogicalOp::Filter {
            predicate: "nonsense".into(),
        });
        let rule = singleton_rule(OperatorKind::Filter, Platform::Local);
        let op = plan.get(f).unwrap();
        assert!(rule.replace(&[op], 1, 1, Epoch::INITIAL).is_err());
    }
}
