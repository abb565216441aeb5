#![forbid(unsafe_code)]
//! polyplan-planner: logical plan -> candidate replacements -> execution plan.
//!
//! Pipeline:
//!     * `dsl`: YAML pipelines -> `OperatorPlan`
//!     * `pattern` / `rule`: subplan patterns and the immutable rule registry
//!     * `matcher`: finds every pattern occurrence and materializes candidates
//!     * `optimizer`: picks a non-overlapping, channel-compatible, cheapest cover
//!     * `execution`: the resulting platform-bound task graph
//!     * `compiler`: the facade that strings the above together
//!
//! Matching and optimization only read the logical plan.

pub mod channels;
pub mod compiler;
pub mod dsl;
pub mod error;
pub mod execution;
pub mod matcher;
pub mod optimizer;
pub mod pattern;
pub mod rule;
#[cfg(test)]
mod testing;

pub use compiler::PlanCompiler;
pub use dsl::yaml::{parse_yaml_pipeline, DslError, ParsedPipeline, PipelineConfig};
pub use error::{CompileError, MappingError, OptimizeError, PatternError};
pub use execution::{ExecutionPlan, Junction, JunctionTarget, PlanStructure, Task, TaskSlot};
pub use matcher::{find_matches, Candidate, MappingEngine, OperatorEstimate, SubplanMatch};
pub use optimizer::{optimize, OptimizationProblem, SelectionScore, Solution};
pub use pattern::{OperatorPattern, SubplanPattern, SubplanPatternBuilder};
pub use rule::{PlanTransformation, ReplacementSubplan, ReplacementSubplanFactory, RuleRegistry};
