#![forbid(unsafe_code)]
//! polyplan-exec: runs an `ExecutionPlan` and records its lineage.
//!
//! The driver executes tasks one at a time in dependency order. Platforms
//! may parallelize inside an evaluation; the driver never does.

pub mod driver;
pub mod error;
pub mod sink;

pub use driver::{CreatedChannel, Driver};
pub use error::{ExecError, Result};
pub use sink::{load_lineage, JsonLineageSink, LineageSink};
