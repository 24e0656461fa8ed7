//! Top-level error type composing every component's errors
//! (SPEC_FULL.md 10.2).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy per spec 7, realized as structured variants carrying
/// enough to reconstruct `{code, statusCode, message}` at the RPC
/// boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Kv(#[from] mailengine_kv::KvError),

    #[error(transparent)]
    Queue(#[from] mailengine_queue::QueueError),

    #[error(transparent)]
    Webhook(#[from] mailengine_webhooks::WebhookError),

    #[error(transparent)]
    Mail(#[from] mailengine_mail::MailError),

    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),

    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error(transparent)]
    Token(#[from] crate::tokens::TokenError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Spec 7 "Missing owner": statusCode 503.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Supervisor(crate::supervisor::SupervisorError::NoActiveHandler(_)) => 503,
            EngineError::Supervisor(crate::supervisor::SupervisorError::Timeout(_)) => 504,
            EngineError::Config(_) => 400,
            _ => 500,
        }
    }

    /// Structured `code` field surfaced verbatim to RPC callers (spec 7:
    /// "Propagation policy").
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Supervisor(crate::supervisor::SupervisorError::NoActiveHandler(_)) => {
                "NoActiveHandler"
            }
            EngineError::Supervisor(crate::supervisor::SupervisorError::Timeout(_)) => "Timeout",
            EngineError::Kv(_) => "KvError",
            EngineError::Queue(_) => "QueueError",
            EngineError::Webhook(_) => "WebhookError",
            EngineError::Mail(_) => "MailError",
            EngineError::Registry(_) => "RegistryError",
            EngineError::Supervisor(_) => "SupervisorError",
            EngineError::Crypto(_) => "CryptoError",
            EngineError::Token(_) => "TokenError",
            EngineError::Config(_) => "ConfigError",
            EngineError::Io(_) => "IoError",
            EngineError::Serialization(_) => "SerializationError",
        }
    }
}
