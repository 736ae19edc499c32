//! Notification error types.

use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifications not configured: {0}")]
    NotConfigured(String),

    #[error("Telegram API error ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifyError {
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    pub fn api(status: u16, description: impl Into<String>) -> Self {
        Self::Api {
            status,
            description: description.into(),
        }
    }
}
