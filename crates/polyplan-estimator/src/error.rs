use thiserror::Error;

pub type Result<T> = std::result::Result<T, EstimatorError>;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("cannot parse cost specifications: {0}")]
    Parse(String),

    #[error("invalid cost model for '{key}': {reason}")]
    InvalidModel { key: String, reason: String },

    #[error("specification source unavailable: {0}")]
    Source(String),
}

impl From<serde_yaml::Error> for EstimatorError {
    fn from(e: serde_yaml::Error) -> Self {
        EstimatorError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for EstimatorError {
    fn from(e: serde_json::Error) -> Self {
        EstimatorError::Parse(e.to_string())
    }
}
