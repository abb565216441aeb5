//! YAML pipelines parsed, compiled, and executed end to end.

mod test_support;

use polyplan_core::config::EngineConfig;
use polyplan_core::operator::ExecutionContext;
use polyplan_core::platform::Platform;
use polyplan_exec::Driver;
use polyplan_operators::default_specs;
use polyplan_planner::{parse_yaml_pipeline, DslError};
use test_support::*;

const PIPELINE: &str = r#"
config:
  platform_priority: [local, distributed]
  parallelism: 2
steps:
  - op: source
    id: orders
    records:
      - { id: 1, customer: "ann", total: 40 }
      - { id: 2, customer: "bob", total: 5 }
      - { id: 3, customer: "cyd", total: 75 }
      - { id: 4, customer: "ann", total: 12 }
  - op: source
    id: members
    records: [{ customer: "ann" }, { customer: "cyd" }]
  - op: filter
    inputs: [orders]
    predicate: "customer in @members"
    broadcasts: { members: members }
  - op: filter
    predicate: "total >= 10"
  - op: map
    expr: "total AS amount"
  - op: project
    columns: [id, amount]
  - op: sink
    destination: "memory://big_member_orders"
"#;

#[test]
fn test_yaml_pipeline_runs_end_to_end() {
    let parsed = parse_yaml_pipeline(PIPELINE).unwrap();
    let mut config = EngineConfig::default();
    parsed.config.apply(&mut config).unwrap();
    assert_eq!(config.distributed_parallelism, 2);
    assert_eq!(config.optimizer.platform_priority, vec![Platform::Local, Platform::Distributed]);

    let compiler = compiler_with(registry_where(|_| true), default_specs().unwrap(), config);
    let exec = compiler.compile(&parsed.plan, &parsed.hints).unwrap();
    let mut driver = Driver::new(ExecutionContext::new(compiler.config().clone()));
    let lineage = driver.execute(&exec).unwrap();

    let out = driver.results().get("big_member_orders").unwrap();
    assert_eq!(ints(&out, "id"), vec![1, 3, 4]);
    assert_eq!(ints(&out, "amount"), vec![12, 40, 75]);
    assert!(out.iter().all(|r| r.get("customer").is_none()));
    assert!(!lineage.is_empty());
}

#[test]
fn test_yaml_hints_reach_the_estimator() {
    let src = r#"
hints:
  "file:///tmp/polyplan-large.txt": 5000000
steps:
  - op: text
    url: "file:///tmp/polyplan-large.txt"
  - op: filter
    predicate: "line == 'x'"
  - op: sink
    destination: "memory://out"
"#;
    let parsed = parse_yaml_pipeline(src).unwrap();
    assert_eq!(parsed.hints.source_rows.get("file:///tmp/polyplan-large.txt"), Some(&5_000_000));
    let exec = default_compiler().compile(&parsed.plan, &parsed.hints).unwrap();
    let source = exec
        .tasks()
        .iter()
        .find(|t| t.operator.kind() == "text_file_source")
        .unwrap();
    // At five million rows the distributed per-row rate outweighs its startup cost.
    assert_eq!(source.platform(), Platform::Distributed);
}

#[test]
fn test_invalid_yaml_is_rejected() {
    assert!(matches!(parse_yaml_pipeline("steps: ["), Err(DslError::Yaml(_))));
    assert!(matches!(parse_yaml_pipeline("steps: []"), Err(DslError::Invalid(_))));
    let dangling = r#"
steps:
  - op: filter
    predicate: "a > 1"
"#;
    assert!(parse_yaml_pipeline(dangling).is_err());
    let unknown_input = r#"
steps:
  - { op: source, records: [] }
  - { op: sink, inputs: [nowhere], destination: "memory://x" }
"#;
    assert!(matches!(parse_yaml_pipeline(unknown_input), Err(DslError::Invalid(_))));
}

#[test]
fn test_unknown_broadcast_fails_at_mapping() {
    let src = r#"
steps:
  - { op: source, records: [{ a: 1 }] }
  - { op: filter, predicate: "a in @missing" }
  - { op: sink, destination: "memory://x" }
"#;
    let parsed = parse_yaml_pipeline(src).unwrap();
    let err = default_compiler().compile(&parsed.plan, &parsed.hints).unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}
