//! Pieces shared by every bound operator: identity, channel tables, and
//! the per-platform partition runner.

use std::thread;

use polyplan_core::channel::{ChannelDescriptor, ChannelInstance};
use polyplan_core::id::Epoch;
use polyplan_core::operator::EvaluationError;
use polyplan_core::plan::Operator;
use polyplan_core::platform::Platform;
use polyplan_core::types::Record;

/// Identity of a bound operator: which logical operator it came from,
/// where it runs, and in which optimization round it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub platform: Platform,
    pub epoch: Epoch,
}

impl Binding {
    pub fn new(name: impl Into<String>, platform: Platform, epoch: Epoch) -> Self {
        Self {
            name: name.into(),
            platform,
            epoch,
        }
    }

    pub fn of(op: &Operator, platform: Platform, epoch: Epoch) -> Self {
        Self::new(op.name(), platform, epoch)
    }

    /// Descriptors this platform reads on a main input.
    pub fn input_channels(&self) -> Vec<ChannelDescriptor> {
        match self.platform {
            Platform::Local => vec![ChannelDescriptor::Stream, ChannelDescriptor::Collection],
            Platform::Distributed => vec![ChannelDescriptor::Partitioned],
        }
    }

    /// Descriptors this platform can fill on an output.
    pub fn output_channels(&self) -> Vec<ChannelDescriptor> {
        match self.platform {
            Platform::Local => vec![ChannelDescriptor::Stream, ChannelDescriptor::Collection],
            Platform::Distributed => vec![ChannelDescriptor::Partitioned],
        }
    }

    /// Apply `f` to every partition. The distributed platform runs one
    /// scoped worker per partition; the local one iterates in place.
    pub fn run_partitions<F>(
        &self,
        partitions: Vec<Vec<Record>>,
        f: F,
    ) -> Result<Vec<Vec<Record>>, EvaluationError>
    where
        F: Fn(Vec<Record>) -> Result<Vec<Record>, EvaluationError> + Sync,
    {
        match self.platform {
            Platform::Local => partitions.into_iter().map(&f).collect(),
            Platform::Distributed => thread::scope(|s| {
                let f = &f;
                let workers: Vec<_> = partitions
                    .into_iter()
                    .map(|part| s.spawn(move || f(part)))
                    .collect();
                workers
                    .into_iter()
                    .map(|w| w.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            }),
        }
    }
}

/// Check the number of input instances against the declared arity.
pub(crate) fn expect_inputs(
    inputs: Vec<ChannelInstance>,
    expected: usize,
    operator: &str,
) -> Result<Vec<ChannelInstance>, EvaluationError> {
    if inputs.len() != expected {
        return Err(EvaluationError::InvalidParameters(format!(
            "{operator} expects {expected} input channel(s), got {}",
            inputs.len()
        )));
    }
    Ok(inputs)
}

/// Fill the single output instance with `partitions` and hand it back.
pub(crate) fn fill_output(
    mut outputs: Vec<ChannelInstance>,
    partitions: Vec<Vec<Record>>,
    operator: &str,
) -> Result<Vec<ChannelInstance>, EvaluationError> {
    let out = outputs.first_mut().ok_or_else(|| {
        EvaluationError::InvalidParameters(format!("{operator} was given no output channel"))
    })?;
    out.accept_partitions(partitions);
    Ok(outputs)
}

/// Trait items every bound operator implements the same way.
macro_rules! bound_identity {
    () => {
        fn name(&self) -> &str {
            &self.binding.name
        }

        fn platform(&self) -> polyplan_core::platform::Platform {
            self.binding.platform
        }

        fn epoch(&self) -> polyplan_core::id::Epoch {
            self.binding.epoch
        }

        fn copy(&self) -> Box<dyn polyplan_core::operator::ExecutionOperator> {
            Box::new(self.clone())
        }
    };
}

pub(crate) use bound_identity;
