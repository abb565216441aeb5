use thiserror::Error;

use crate::id::OperatorId;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid operator plan: {0}")]
    Plan(#[from] PlanError),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("hashing error: {0}")]
    Hash(String),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

/// Structural defects of an `OperatorPlan`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unknown operator {0}")]
    UnknownOperator(OperatorId),

    #[error("{operator} has no {direction} slot {slot}")]
    NoSuchSlot {
        operator: OperatorId,
        direction: &'static str,
        slot: usize,
    },

    #[error("input slot {slot} of {operator} is connected more than once")]
    InputAlreadyConnected { operator: OperatorId, slot: usize },

    #[error("required input slot {slot} of {operator} ('{name}') is not connected")]
    UnconnectedInput {
        operator: OperatorId,
        name: String,
        slot: usize,
    },

    #[error("output slot {slot} of {operator} ('{name}') has no consumer")]
    DanglingOutput {
        operator: OperatorId,
        name: String,
        slot: usize,
    },

    #[error("operator plan contains a cycle through {0}")]
    Cycle(OperatorId),

    #[error("operator plan is empty")]
    Empty,
}
