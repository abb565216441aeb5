#![forbid(unsafe_code)]
//! polyplan-estimator: load profiles for operators and channel conversions.
//!
//! Responsibilities:
//! - Resolve specification keys to cost models through a `SpecSource`.
//! - Estimate a `LoadProfile` from input statistics; never fail.
//! - Propagate cardinalities over a logical plan.
//! - Blend declared models with realized costs read from sealed lineage.

pub mod cardinality;
pub mod error;
pub mod estimator;
pub mod model;
pub mod spec;

pub use cardinality::{estimate_filter_selectivity, propagate_cardinalities, CardinalityHints, PlanStatistics};
pub use error::{EstimatorError, Result};
pub use estimator::LoadProfileEstimator;
pub use model::{Breakpoint, CostModel, InputStatistics};
pub use spec::{CachedSpecSource, InMemorySpecSource, SpecSource};
