//! Notification event envelope (spec 3: Data Model, GLOSSARY).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kinds emitted by the IMAP worker and queued for notification
/// delivery (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    MessageNew,
    MessageDeleted,
    MessageUpdated,
    MailboxReset,
    MailboxDeleted,
    MailboxNew,
    AuthenticationError,
    ConnectError,
    MessageSent,
    MessageFailed,
    MessageBounce,
    Test,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageNew => "messageNew",
            Self::MessageDeleted => "messageDeleted",
            Self::MessageUpdated => "messageUpdated",
            Self::MailboxReset => "mailboxReset",
            Self::MailboxDeleted => "mailboxDeleted",
            Self::MailboxNew => "mailboxNew",
            Self::AuthenticationError => "authenticationError",
            Self::ConnectError => "connectError",
            Self::MessageSent => "messageSent",
            Self::MessageFailed => "messageFailed",
            Self::MessageBounce => "messageBounce",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event envelope (spec 3: `{account, date, event, data, nonce}`).
/// This is the body of every `notify` job and every webhook POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub account: String,
    pub date: DateTime<Utc>,
    pub event: EventKind,
    pub data: serde_json::Value,
    pub nonce: String,
}

impl EventEnvelope {
    pub fn new(account: impl Into<String>, event: EventKind, data: serde_json::Value) -> Self {
        Self {
            account: account.into(),
            date: Utc::now(),
            event,
            data,
            nonce: Uuid::new_v4().to_string(),
        }
    }

    /// Serialize to the raw JSON body sent to the webhook URL and signed.
    pub fn to_body(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_through_json() {
        let value = serde_json::to_value(EventKind::MessageNew).unwrap();
        assert_eq!(value, serde_json::json!("messageNew"));
        let back: EventKind = serde_json::from_value(value).unwrap();
        assert_eq!(back, EventKind::MessageNew);
    }

    #[test]
    fn envelope_carries_a_unique_nonce() {
        let a = EventEnvelope::new("acct-1", EventKind::MessageNew, serde_json::json!({}));
        let b = EventEnvelope::new("acct-1", EventKind::MessageNew, serde_json::json!({}));
        assert_ne!(a.nonce, b.nonce);
    }
}
