use thiserror::Error;

use polyplan_core::error::PlanError;
use polyplan_core::platform::Platform;
use polyplan_core::plan::OperatorKind;

/// A malformed subplan pattern or rule; raised at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern '{0}' has no nodes")]
    Empty(String),

    #[error("pattern '{pattern}' refers to unknown node {node}")]
    UnknownNode { pattern: String, node: usize },

    #[error("pattern '{pattern}': node {node} has no {direction} slot {slot}")]
    SlotOutOfRange {
        pattern: String,
        node: usize,
        direction: &'static str,
        slot: usize,
    },

    #[error("pattern '{pattern}': {direction} slot {slot} of node {node} is {problem}")]
    SlotBinding {
        pattern: String,
        node: usize,
        direction: &'static str,
        slot: usize,
        problem: &'static str,
    },

    #[error("pattern '{0}' is not connected")]
    Disconnected(String),

    #[error("pattern '{0}' is cyclic")]
    Cyclic(String),

    #[error("rule '{rule}': platform {platform} cannot execute {kind}")]
    UnsupportedKind {
        rule: String,
        platform: Platform,
        kind: OperatorKind,
    },

    #[error("rule '{0}' is registered twice")]
    DuplicateRule(String),
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("rule '{rule}' could not build a replacement for {operators}: {reason}")]
    Replacement {
        rule: String,
        operators: String,
        reason: String,
    },

    #[error("rule '{rule}': replacement exposes {got} {direction} boundaries, match has {expected}")]
    ArityMismatch {
        rule: String,
        direction: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Why no execution plan could be selected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizeError {
    #[error("unsatisfiable plan: no candidate covers {}", .uncovered.join(", "))]
    Unsatisfiable { uncovered: Vec<String> },

    #[error("unsatisfiable plan: no compatible channel from {producer} to {consumer}")]
    NoCompatibleChannel { producer: String, consumer: String },

    #[error("internal optimizer fault: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("mapping failed: {0}")]
    Mapping(#[from] MappingError),

    #[error("optimization failed: {0}")]
    Optimize(#[from] OptimizeError),
}
