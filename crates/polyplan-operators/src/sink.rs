//! Terminal operators: `memory://name` into the run's result store, or a
//! JSONL file for `file://path` (and bare paths).

use std::time::Instant;

use tracing::debug;

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
use polyplan_core::platform::Platform;

use crate::bound::{bound_identity, expect_inputs, Binding};
use crate::error::{OpError, Result};
use crate::jsonl::JsonlWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Memory(String),
    File(String),
}

impl Destination {
    pub fn parse(s: &str) -> Result<Destination> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix("memory://") {
            if name.is_empty() {
                return Err(OpError::Destination(s.to_string()));
            }
            return Ok(Destination::Memory(name.to_string()));
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        if path.is_empty() || path.contains("://") {
            return Err(OpError::Destination(s.to_string()));
        }
        Ok(Destination::File(path.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Sink {
    pub binding: Binding,
    pub destination: Destination,
}

impl Sink {
    pub fn new(binding: Binding, destination: &str) -> Result<Self> {
        Ok(Self {
            binding,
            destination: Destination::parse(destination)?,
        })
    }
}

impl ExecutionOperator for Sink {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "sink"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn supported_input_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        match self.binding.platform {
            Platform::Local => self.binding.input_channels(),
            // Gathers partitions itself, so a collected input also works.
            Platform::Distributed => vec![ChannelDescriptor::Partitioned, ChannelDescriptor::Collection],
        }
    }

    fn supported_output_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        Vec::new()
    }

    fn evaluate(
        &self,
        inputs: Vec<ChannelInstance>,
        outputs: Vec<ChannelInstance>,
        ctx: &ExecutionContext,
        op_ctx: &OperatorContext,
    ) -> std::result::Result<Evaluation, EvaluationError> {
        let mut inputs = expect_inputs(inputs, 1, self.name())?;
        let started = Instant::now();
        let records = inputs.remove(0).into_records()?;
        let n = records.len() as u64;
        match &self.destination {
            Destination::Memory(name) => ctx.results.append(name, records),
            Destination::File(path) => {
                let access = |source| EvaluationError::DataAccess {
                    location: path.clone(),
                    source,
                };
                let mut w = JsonlWriter::to_path(path).map_err(access)?;
                w.write_records(records.iter()).map_err(access)?;
            }
        }
        debug!(sink = %self.name(), rows = n, "sink wrote records");
        let (prepare, main) = op_ctx.lineage(std::time::Duration::ZERO, started.elapsed(), n, &outputs);
        Ok(Evaluation {
            prepare,
            main,
            produced: outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input, op_ctx, people};
    use polyplan_core::config::EngineConfig;
    use polyplan_core::id::Epoch;

    #[test]
    fn destinations_parse() {
        assert_eq!(Destination::parse("memory://out").unwrap(), Destination::Memory("out".into()));
        assert_eq!(
            Destination::parse("file:///tmp/x.jsonl").unwrap(),
            Destination::File("/tmp/x.jsonl".into())
        );
        assert_eq!(Destination::parse("out.jsonl").unwrap(), Destination::File("out.jsonl".into()));
        assert!(Destination::parse("s3://bucket/key").is_err());
        assert!(Destination::parse("memory://").is_err());
    }

    #[test]
    fn memory_sink_appends_to_result_store() {
        let sink = Sink::new(Binding::new("sink", Platform::Distributed, Epoch::INITIAL), "memory://out").unwrap();
        let ctx = ExecutionContext::new(EngineConfig::default());
        let eval = sink
            .evaluate(vec![input(ChannelDescriptor::Partitioned, people())], vec![], &ctx, &op_ctx(&sink))
            .unwrap();
        assert!(eval.produced.is_empty());
        assert_eq!(ctx.results.get("out").map(|r| r.len()), Some(4));
        assert_eq!(eval.main.realized.unwrap().input_cardinality, 4);
    }

    #[test]
    fn file_sink_writes_jsonl() {
        let path = std::env::temp_dir().join(format!("polyplan-sink-{}.jsonl", std::process::id()));
        let sink = Sink::new(
            Binding::new("sink", Platform::Local, Epoch::INITIAL),
            &format!("file://{}", path.display()),
        )
        .unwrap();
        let ctx = ExecutionContext::new(EngineConfig::default());
        sink.evaluate(vec![input(ChannelDescriptor::Stream, people())], vec![], &ctx, &op_ctx(&sink))
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
        let _ = std::fs::remove_file(path);
    }
}
