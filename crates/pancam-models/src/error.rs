//! Error types for model parsing.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown operating mode: {0}")]
    UnknownMode(String),

    #[error("Unknown protocol format: {0}")]
    UnknownProtocol(String),
}
