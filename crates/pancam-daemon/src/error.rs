//! Daemon error types.

use thiserror::Error;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Stream lost: {0}")]
    StreamLost(String),

    #[error("Stream error: {0}")]
    Stream(#[from] reqwest::Error),

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Vision error: {0}")]
    Vision(#[from] pancam_vision::VisionError),

    #[error("Control error: {0}")]
    Control(#[from] pancam_control::ControlError),

    #[error("Notification error: {0}")]
    Notify(#[from] pancam_notify::NotifyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn stream_unavailable(msg: impl Into<String>) -> Self {
        Self::StreamUnavailable(msg.into())
    }

    pub fn stream_lost(msg: impl Into<String>) -> Self {
        Self::StreamLost(msg.into())
    }

    pub fn actuator(msg: impl Into<String>) -> Self {
        Self::Actuator(msg.into())
    }

    /// Errors that should stop the daemon with exit code 1.
    pub fn is_fatal(&self) -> bool {
        match self {
            DaemonError::Config(_)
            | DaemonError::StreamUnavailable(_)
            | DaemonError::Control(_) => true,
            DaemonError::Vision(e) => e.is_config(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DaemonError::config("bad").is_fatal());
        assert!(DaemonError::stream_unavailable("down").is_fatal());
        assert!(DaemonError::from(pancam_vision::VisionError::invalid_config("x")).is_fatal());
        assert!(!DaemonError::actuator("pipe closed").is_fatal());
        assert!(!DaemonError::stream_lost("no frame for 20s").is_fatal());
        assert!(!DaemonError::from(std::io::Error::other("x")).is_fatal());
    }
}
