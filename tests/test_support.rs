//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use polyplan_core::config::EngineConfig;
use polyplan_core::plan::{LogicalOp, OperatorPlan};
use polyplan_core::platform::Platform;
use polyplan_core::types::{Record, Scalar};
use polyplan_estimator::{InMemorySpecSource, LoadProfileEstimator};
use polyplan_operators::{default_mappings, default_specs};
use polyplan_planner::{PlanCompiler, PlanTransformation, RuleRegistry};

/// Every operator and conversion at a flat 1ms, so selection depends only
/// on what the test overrides.
pub const UNIT_SPECS_YAML: &str = r#"
local.collection_source.prepare: { model: linear }
local.collection_source.main:    { model: linear, fixed_ms: 1.0 }
local.text_file_source.prepare:  { model: linear }
local.text_file_source.main:     { model: linear, fixed_ms: 1.0 }
local.filter.prepare:            { model: linear }
local.filter.main:               { model: linear, fixed_ms: 1.0 }
local.map.prepare:               { model: linear }
local.map.main:                  { model: linear, fixed_ms: 1.0 }
local.project.prepare:           { model: linear }
local.project.main:              { model: linear, fixed_ms: 1.0 }
local.union.prepare:             { model: linear }
local.union.main:                { model: linear, fixed_ms: 1.0 }
local.sink.prepare:              { model: linear }
local.sink.main:                 { model: linear, fixed_ms: 1.0 }
distributed.collection_source.prepare: { model: linear }
distributed.collection_source.main:    { model: linear, fixed_ms: 1.0 }
distributed.text_file_source.prepare:  { model: linear }
distributed.text_file_source.main:     { model: linear, fixed_ms: 1.0 }
distributed.filter.prepare:            { model: linear }
distributed.filter.main:               { model: linear, fixed_ms: 1.0 }
distributed.filter_project.prepare:    { model: linear }
distributed.filter_project.main:       { model: linear, fixed_ms: 1.0 }
distributed.map.prepare:               { model: linear }
distributed.map.main:                  { model: linear, fixed_ms: 1.0 }
distributed.project.prepare:           { model: linear }
distributed.project.main:              { model: linear, fixed_ms: 1.0 }
distributed.union.prepare:             { model: linear }
distributed.union.main:                { model: linear, fixed_ms: 1.0 }
distributed.sink.prepare:              { model: linear }
distributed.sink.main:                 { model: linear, fixed_ms: 1.0 }
conversion.collect:     { model: linear, fixed_ms: 1.0 }
conversion.stream:      { model: linear, fixed_ms: 1.0 }
conversion.parallelize: { model: linear, fixed_ms: 1.0 }
conversion.gather:      { model: linear, fixed_ms: 1.0 }
"#;

pub fn unit_specs() -> InMemorySpecSource {
    InMemorySpecSource::from_yaml_str(UNIT_SPECS_YAML).unwrap()
}

/// Unit specs with `overrides` (YAML, same shape) laid on top.
pub fn unit_specs_with(overrides: &str) -> InMemorySpecSource {
    unit_specs().merge(InMemorySpecSource::from_yaml_str(overrides).unwrap())
}

/// Built-in rules kept by `keep`.
pub fn registry_where(keep: impl Fn(&PlanTransformation) -> bool) -> RuleRegistry {
    RuleRegistry::builder()
        .rules(default_mappings().unwrap().into_iter().filter(|r| keep(r)))
        .build()
        .unwrap()
}

pub fn compiler(registry: RuleRegistry, specs: InMemorySpecSource) -> PlanCompiler {
    compiler_with(registry, specs, EngineConfig::default())
}

pub fn compiler_with(registry: RuleRegistry, specs: InMemorySpecSource, config: EngineConfig) -> PlanCompiler {
    let estimator = LoadProfileEstimator::new(Arc::new(specs), config.estimator.clone());
    PlanCompiler::new(Arc::new(registry), estimator, config)
}

/// Every built-in rule against the built-in cost specifications.
pub fn default_compiler() -> PlanCompiler {
    compiler(registry_where(|_| true), default_specs().unwrap())
}

pub fn local_only() -> RuleRegistry {
    registry_where(|r| r.platform == Platform::Local)
}

pub fn numbers(n: i64) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::new()
                .with("n", Scalar::I64(i))
                .with("parity", Scalar::Str(if i % 2 == 0 { "even" } else { "odd" }.into()))
        })
        .collect()
}

/// `source(numbers(n)) -> filter(predicate) -> sink(memory://out)`
pub fn source_filter_sink(n: i64, predicate: &str) -> OperatorPlan {
    let mut plan = OperatorPlan::new();
    let src = plan.add_named("source", LogicalOp::CollectionSource { records: numbers(n) });
    let f = plan.add_named(
        "filter",
        LogicalOp::Filter {
            predicate: predicate.into(),
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

pub fn ints(records: &[Record], column: &str) -> Vec<i64> {
    let mut out: Vec<i64> = records
        .iter()
        .filter_map(|r| match r.get(column) {
            Some(Scalar::I64(i)) => Some(*i),
            _ => None,
        })
        .collect();
    out.sort_unstable();
    out
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("polyplan-it-{}-{}", std::process::id(), name))
}
