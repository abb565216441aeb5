//! Fixtures for evaluating single operators outside the driver.

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::id::{ChannelId, TaskId};
use polyplan_core::operator::{ExecutionOperator, OperatorContext};
use polyplan_core::types::{Record, Scalar};

pub fn op_ctx(op: &dyn ExecutionOperator) -> OperatorContext {
    OperatorContext {
        task: TaskId::new(0),
        name: op.name().to_string(),
        keys: op.load_profile_keys(),
        prepare_estimate: None,
        main_estimate: None,
    }
}

pub fn output(descriptor: ChannelDescriptor) -> ChannelInstance {
    ChannelInstance::new(ChannelId::new(100), descriptor, TaskId::new(0))
}

/// A produced instance holding `rows`.
pub fn input(descriptor: ChannelDescriptor, rows: Vec<Record>) -> ChannelInstance {
    let mut c = ChannelInstance::new(ChannelId::new(1), descriptor, TaskId::new(9));
    c.accept_records(rows);
    c
}

pub fn people() -> Vec<Record> {
    [("ann", 34), ("bob", 17), ("cyd", 52), ("dee", 17)]
        .iter()
        .map(|(n, a)| {
            Record::new()
                .with("name", Scalar::Str(n.to_string()))
                .with("age", Scalar::I64(*a))
        })
        .collect()
}
