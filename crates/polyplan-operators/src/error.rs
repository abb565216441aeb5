use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpError>;

/// Problems found while binding a logical operator to a concrete one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpError {
    #[error("unparseable predicate '{0}'")]
    Predicate(String),

    #[error("predicate references unknown broadcast input '@{0}'")]
    UnknownBroadcast(String),

    #[error("unsupported destination '{0}'")]
    Destination(String),

    #[error("{expected} rule applied to a {got} operator")]
    WrongKind {
        expected: &'static str,
        got: &'static str,
    },
}
