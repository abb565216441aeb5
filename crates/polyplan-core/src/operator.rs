//! Evaluation interface implemented by every platform-bound operator.
//!
//! The driver calls `evaluate` once per task; the optimizer only looks at
//! the channel declarations and `copy`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::channel::{ChannelDescriptor, ChannelInstance};
use crate::config::EngineConfig;
use crate::id::{Epoch, TaskId};
use crate::lineage::{ExecutionLineageNode, LineagePhase, RealizedCost};
use crate::load::LoadProfile;
use crate::platform::Platform;
use crate::types::Record;

/// Faults reported by an operator's evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("cannot access '{location}': {source}")]
    DataAccess {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid operator parameters: {0}")]
    InvalidParameters(String),

    #[error("bad input: {0}")]
    Input(#[from] crate::error::Error),
}

/// Specification keys for the fixed and data-dependent cost of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfileKeys {
    pub prepare: String,
    pub main: String,
}

/// Output of one evaluation.
#[derive(Debug)]
pub struct Evaluation {
    pub prepare: ExecutionLineageNode,
    pub main: ExecutionLineageNode,
    pub produced: Vec<ChannelInstance>,
}

pub trait ExecutionOperator: Send + Sync + fmt::Debug {
    /// Instance name, usually derived from the logical operator it replaces.
    fn name(&self) -> &str;

    /// Stable implementation name; the middle segment of its spec keys.
    fn kind(&self) -> &'static str;

    fn platform(&self) -> Platform;

    /// Optimization round that created this instance.
    fn epoch(&self) -> Epoch;

    /// Main plus broadcast inputs.
    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    fn supported_input_channels(&self, slot: usize) -> Vec<ChannelDescriptor>;

    fn supported_output_channels(&self, slot: usize) -> Vec<ChannelDescriptor>;

    fn load_profile_keys(&self) -> LoadProfileKeys {
        LoadProfileKeys {
            prepare: self.platform().spec_key(self.kind(), "prepare"),
            main: self.platform().spec_key(self.kind(), "main"),
        }
    }

    /// Independent clone with the same parameters and epoch.
    fn copy(&self) -> Box<dyn ExecutionOperator>;

    /// Consume `inputs`, fill `outputs`, and report lineage.
    fn evaluate(
        &self,
        inputs: Vec<ChannelInstance>,
        outputs: Vec<ChannelInstance>,
        ctx: &ExecutionContext,
        op_ctx: &OperatorContext,
    ) -> Result<Evaluation, EvaluationError>;
}

/// Named in-memory outputs for `memory://` sinks; shared across a run.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    inner: Arc<Mutex<BTreeMap<String, Vec<Record>>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, name: &str, records: Vec<Record>) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry(name.to_string()).or_default().extend(records);
    }

    pub fn get(&self, name: &str) -> Option<Vec<Record>> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.keys().cloned().collect()
    }
}

/// Run-wide state handed to every evaluation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub config: EngineConfig,
    pub results: ResultStore,
    pub run_id: Uuid,
}

impl ExecutionContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            results: ResultStore::new(),
            run_id: Uuid::new_v4(),
        }
    }
}

/// Per-task state: identity and the estimates the optimizer used.
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub task: TaskId,
    pub name: String,
    pub keys: LoadProfileKeys,
    pub prepare_estimate: Option<LoadProfile>,
    pub main_estimate: Option<LoadProfile>,
}

impl OperatorContext {
    /// Build the prepare and main lineage nodes from measured figures.
    pub fn lineage(
        &self,
        prepare_elapsed: Duration,
        main_elapsed: Duration,
        input_cardinality: u64,
        produced: &[ChannelInstance],
    ) -> (ExecutionLineageNode, ExecutionLineageNode) {
        let output_cardinality = produced.iter().map(ChannelInstance::cardinality).sum();
        let output_bytes = produced.iter().map(ChannelInstance::approx_bytes).sum();

        let mut prepare = ExecutionLineageNode::new(self.task, &self.name, LineagePhase::Prepare)
            .with_spec(&self.keys.prepare, self.prepare_estimate);
        prepare.realized = Some(RealizedCost {
            elapsed_ms: prepare_elapsed.as_secs_f64() * 1e3,
            input_cardinality,
            output_cardinality: 0,
            output_bytes: 0,
        });

        let mut main = ExecutionLineageNode::new(self.task, &self.name, LineagePhase::Main)
            .with_spec(&self.keys.main, self.main_estimate);
        main.realized = Some(RealizedCost {
            elapsed_ms: main_elapsed.as_secs_f64() * 1e3,
            input_cardinality,
            output_cardinality,
            output_bytes,
        });
        (prepare, main)
    }
}
