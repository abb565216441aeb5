#![forbid(unsafe_code)]
//! polyplan-core: the shared vocabulary of the plan compiler.
//!
//! - `plan`: the logical operator DAG (arena of operators + slot edges).
//! - `platform` / `channel`: the closed set of execution platforms and the
//!   hand-off descriptors between them.
//! - `load` / `lineage`: estimated and realized cost records.
//! - `operator`: the evaluation interface every platform-bound operator implements.
//!
//! No I/O, no async, no estimation logic here.

pub mod channel;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod id;
pub mod lineage;
pub mod load;
pub mod operator;
pub mod plan;
pub mod platform;
pub mod prelude;
pub mod types;

/// Engine version string recorded on lineage graphs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
