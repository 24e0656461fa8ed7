//! Error types for notification delivery.

use thiserror::Error;

/// Errors that can occur while delivering a notification webhook.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// HTTP request failed (spec 7: transient transport).
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL, including a malformed embedded Basic-auth userinfo.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Payload serialization/deserialization failed.
    #[error("Payload error: {0}")]
    PayloadError(String),

    /// Configuration error (e.g. missing service secret).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::PayloadError(err.to_string())
    }
}
