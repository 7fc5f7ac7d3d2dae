//! Typed errors for every layer of the engine: one variant per
//! distinguishable failure kind, instead of a single untyped message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("syntax error: {0}")]
    Syntax(String),
}

impl Error {
    pub fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Error::Constraint(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Error::Transaction(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
