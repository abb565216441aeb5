use std::path::PathBuf;

use thiserror::Error;

use polyplan_core::id::TaskId;
use polyplan_core::operator::EvaluationError;
use polyplan_core::platform::Platform;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    /// An operator reported a fault; the run was aborted.
    #[error("{operator} ({task}, {platform}) failed on {channels}: {source}")]
    Execution {
        task: TaskId,
        operator: String,
        platform: Platform,
        /// Input and output channel instances handed to the evaluation.
        channels: String,
        #[source]
        source: EvaluationError,
    },

    /// The plan and the driver disagree; this is a planner or driver bug.
    #[error("internal consistency fault: {0}")]
    Internal(String),

    #[error("cannot persist lineage to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lineage encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ExecError {
    /// The evaluation fault behind an aborted run, if that is what this is.
    pub fn evaluation(&self) -> Option<&EvaluationError> {
        match self {
            ExecError::Execution { source, .. } => Some(source),
            _ => None,
        }
    }
}
