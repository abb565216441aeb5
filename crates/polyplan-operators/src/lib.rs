#![forbid(unsafe_code)]
//! polyplan-operators: the concrete operators of the two bundled platforms.
//!
//! - `Local` operators iterate materialized rows on the calling thread.
//! - `Distributed` operators work per partition, one scoped worker each.
//!
//! Every operator is constructed from a logical operator by a mapping rule
//! (`mappings`), and prices itself through the keys in `specs`.

pub mod bound;
pub mod error;
pub mod filter;
pub mod jsonl;
pub mod map;
pub mod mappings;
pub mod predicate;
pub mod project;
pub mod sink;
pub mod source;
pub mod specs;
pub mod union;

#[cfg(test)]
mod testing;

pub use bound::Binding;
pub use error::{OpError, Result};
pub use filter::{Filter, FilterProject};
pub use map::Map;
pub use mappings::{default_mappings, default_registry};
pub use predicate::{CompareOp, Memberships, Predicate};
pub use project::Project;
pub use sink::Sink;
pub use source::{CollectionSource, TextFileSource};
pub use specs::{default_specs, DEFAULT_SPECS_YAML};
pub use union::Union;
