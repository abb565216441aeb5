//! Convenient re-exports for downstream crates.

pub use crate::channel::{ChannelConversion, ChannelDescriptor, ChannelInstance, CONVERSIONS};
pub use crate::config::{CostWeights, EngineConfig, EstimatorConfig, OptimizerConfig};
pub use crate::error::{Error, PlanError, Result};
pub use crate::fingerprint::{Fingerprint, FingerprintDomain};
pub use crate::id::*;
pub use crate::lineage::{ExecutionLineageNode, LineageGraph, LineagePhase};
pub use crate::load::{Interval, LoadProfile};
pub use crate::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
pub use crate::plan::{LogicalOp, Operator, OperatorKind, OperatorPlan, SlotRef};
pub use crate::platform::Platform;
pub use crate::types::{Record, Scalar};
