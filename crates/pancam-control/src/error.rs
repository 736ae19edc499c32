//! Error types for the control state machines.

use thiserror::Error;

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ControlError {
    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Reject a value that is not a finite, strictly positive number.
pub(crate) fn require_positive(name: &str, value: f64) -> ControlResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid_config(format!(
            "{name} must be positive, got {value}"
        )))
    }
}
