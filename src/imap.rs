//! IMAP Worker (spec 4.4: C5). The wire protocol (parser, command
//! engine) is an out-of-scope external collaborator (spec 1); this
//! module models the core's side of that boundary: the per-account
//! connection state machine, the RPC surface the supervisor routes to,
//! and event emission into the notification queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailengine_queue::{EnqueueOptions, Queue};
use mailengine_webhooks::EventKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::AccountRegistry;
use crate::supervisor::{CallPayload, CallResult, ControlMessage, Supervisor, WorkerHandle};

pub type ImapResult<T> = std::result::Result<T, ImapError>;

#[derive(Debug, Error)]
pub enum ImapError {
    /// Spec 4.4: "returns `{error: 'No active handler...', statusCode:
    /// 503}` when the targeted account is not currently owned by this
    /// worker (defense-in-depth)."
    #[error("No active handler for requested account: {0}")]
    NotOwned(String),

    #[error("account {0} is in state {1:?}, operation not valid")]
    InvalidState(String, ConnectionState),

    #[error(transparent)]
    Queue(#[from] mailengine_queue::QueueError),

    #[error("capability error: {0}")]
    Capability(String),
}

impl ImapError {
    pub fn status_code(&self) -> u16 {
        match self {
            ImapError::NotOwned(_) => 503,
            _ => 500,
        }
    }
}

/// Per-account connection state (spec 4.4 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Init,
    Connecting,
    Syncing,
    Connected,
    AuthenticationError,
    ConnectError,
    Disconnected,
    Unset,
}

impl ConnectionState {
    /// Whether `to` is a legal transition from `self` (spec 4.4 table's
    /// "Transitions" column).
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Init, Connecting)
                | (Connecting, Syncing)
                | (Connecting, AuthenticationError)
                | (Connecting, ConnectError)
                | (Syncing, Connected)
                | (Connected, Disconnected)
                | (Connected, Syncing)
                | (Connected, AuthenticationError)
                | (AuthenticationError, Connecting)
                | (ConnectError, Connecting)
                | (Disconnected, Connecting)
                | (_, Unset)
        )
    }
}

/// The capability this core consumes from the (out-of-scope) IMAP
/// protocol client: a connection lifecycle plus account/message
/// operations (spec 1: "the core consumes it as a capability that
/// exposes a connection lifecycle, idle/poll events, and
/// message/mailbox operations").
#[async_trait]
pub trait ImapCapability: Send + Sync {
    /// Opens the connection for `account_id` (spec 4.4: "Connection
    /// lifecycle"). The worker drives the resulting state transitions.
    async fn connect(&self, account_id: &str) -> ImapResult<()>;
    async fn disconnect(&self, account_id: &str) -> ImapResult<()>;
    async fn list_messages(&self, account_id: &str, mailbox: &str) -> ImapResult<serde_json::Value>;
    async fn get_message(&self, account_id: &str, message_id: &str) -> ImapResult<serde_json::Value>;
    async fn get_text(&self, account_id: &str, message_id: &str) -> ImapResult<String>;
    async fn get_raw_message(&self, account_id: &str, message_id: &str) -> ImapResult<Vec<u8>>;
    async fn get_attachment(&self, account_id: &str, message_id: &str, part: &str) -> ImapResult<Vec<u8>>;
    async fn update_message(&self, account_id: &str, message_id: &str, flags: serde_json::Value) -> ImapResult<()>;
    async fn move_message(&self, account_id: &str, message_id: &str, to_mailbox: &str) -> ImapResult<()>;
    async fn delete_message(&self, account_id: &str, message_id: &str) -> ImapResult<()>;
    async fn submit_message(&self, account_id: &str, queue_id: &str, message_id: &str) -> ImapResult<()>;
    async fn queue_message(&self, account_id: &str, raw: &[u8]) -> ImapResult<String>;
    async fn upload_message(&self, account_id: &str, mailbox: &str, raw: &[u8]) -> ImapResult<String>;
    async fn create_mailbox(&self, account_id: &str, name: &str) -> ImapResult<()>;
    async fn delete_mailbox(&self, account_id: &str, name: &str) -> ImapResult<()>;
    async fn build_contacts(&self, account_id: &str) -> ImapResult<serde_json::Value>;
}

/// An IMAP-originated change, built into an event envelope and enqueued
/// for notification (spec 4.4: "Event emission").
#[derive(Debug, Clone)]
pub struct ImapChange {
    pub account_id: String,
    pub kind: EventKind,
    pub data: serde_json::Value,
    /// Only checked for `EventKind::MessageNew` (I4).
    pub message_date: Option<DateTime<Utc>>,
}

/// Per-account state tracked by the worker hosting the connection.
pub struct AccountConnection {
    pub state: ConnectionState,
    pub notify_from: DateTime<Utc>,
}

/// Hosts a set of per-account connections (spec 4.4: "One worker may
/// own many accounts"). Owns no wire-protocol code itself — all I/O
/// goes through the injected [`ImapCapability`].
pub struct ImapWorker {
    pub id: String,
    capability: Box<dyn ImapCapability>,
    connections: HashMap<String, AccountConnection>,
    notify_queue: Queue,
}

impl ImapWorker {
    pub fn new(id: impl Into<String>, capability: Box<dyn ImapCapability>, notify_queue: Queue) -> Self {
        Self {
            id: id.into(),
            capability,
            connections: HashMap::new(),
            notify_queue,
        }
    }

    pub fn owns(&self, account_id: &str) -> bool {
        self.connections.contains_key(account_id)
    }

    /// Spec 4.3: supervisor routes `{cmd: assign, account}` here.
    pub fn assign(&mut self, account_id: impl Into<String>, notify_from: DateTime<Utc>) {
        let account_id = account_id.into();
        self.connections.insert(
            account_id,
            AccountConnection {
                state: ConnectionState::Init,
                notify_from,
            },
        );
    }

    pub fn unassign(&mut self, account_id: &str) {
        self.connections.remove(account_id);
    }

    /// Spec 4.4: publishes every state transition. Caller (the
    /// supervisor wiring) is responsible for the KV hash write and
    /// `ControlMessage::Change` broadcast; this just validates and
    /// mutates the in-process state.
    pub fn transition(&mut self, account_id: &str, to: ConnectionState) -> ImapResult<()> {
        let conn = self
            .connections
            .get_mut(account_id)
            .ok_or_else(|| ImapError::NotOwned(account_id.to_string()))?;
        if !conn.state.can_transition_to(to) {
            return Err(ImapError::InvalidState(account_id.to_string(), conn.state));
        }
        debug!(account = account_id, from = ?conn.state, to = ?to, "connection state transition");
        conn.state = to;
        Ok(())
    }

    /// Spec 4.4: "Event emission ... calls `Queue.enqueue('notify',
    /// envelope, {attempts: 10, backoff: exp/5s})`. The `notifyFrom`
    /// watermark is consulted before emitting `messageNew`."
    pub async fn emit(&self, change: ImapChange) -> ImapResult<()> {
        if change.kind == EventKind::MessageNew
            && let Some(conn) = self.connections.get(&change.account_id)
            && let Some(message_date) = change.message_date
            && message_date < conn.notify_from
        {
            debug!(
                account = %change.account_id,
                "suppressing messageNew before notifyFrom watermark (I4)"
            );
            return Ok(());
        }

        let envelope = mailengine_webhooks::EventEnvelope::new(
            change.account_id.clone(),
            change.kind,
            change.data,
        );
        let payload = serde_json::to_value(&envelope).map_err(|e| ImapError::Capability(e.to_string()))?;
        self.notify_queue
            .enqueue(
                payload,
                EnqueueOptions {
                    max_attempts: 10,
                    backoff: mailengine_queue::Backoff::new(5000),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Routes an RPC to this worker's capability if, and only if, it
    /// currently owns the account (spec 4.4: "defense-in-depth").
    pub async fn list_messages(&self, account_id: &str, mailbox: &str) -> ImapResult<serde_json::Value> {
        self.require_owned(account_id)?;
        self.capability.list_messages(account_id, mailbox).await
    }

    pub async fn submit_message(&self, account_id: &str, queue_id: &str, message_id: &str) -> ImapResult<()> {
        self.require_owned(account_id)?;
        self.capability.submit_message(account_id, queue_id, message_id).await
    }

    pub async fn get_message(&self, account_id: &str, message_id: &str) -> ImapResult<serde_json::Value> {
        self.require_owned(account_id)?;
        self.capability.get_message(account_id, message_id).await
    }

    pub async fn get_text(&self, account_id: &str, message_id: &str) -> ImapResult<String> {
        self.require_owned(account_id)?;
        self.capability.get_text(account_id, message_id).await
    }

    pub async fn get_raw_message(&self, account_id: &str, message_id: &str) -> ImapResult<Vec<u8>> {
        self.require_owned(account_id)?;
        self.capability.get_raw_message(account_id, message_id).await
    }

    pub async fn get_attachment(&self, account_id: &str, message_id: &str, part: &str) -> ImapResult<Vec<u8>> {
        self.require_owned(account_id)?;
        self.capability.get_attachment(account_id, message_id, part).await
    }

    pub async fn update_message(&self, account_id: &str, message_id: &str, flags: serde_json::Value) -> ImapResult<()> {
        self.require_owned(account_id)?;
        self.capability.update_message(account_id, message_id, flags).await
    }

    pub async fn move_message(&self, account_id: &str, message_id: &str, to_mailbox: &str) -> ImapResult<()> {
        self.require_owned(account_id)?;
        self.capability.move_message(account_id, message_id, to_mailbox).await
    }

    pub async fn delete_message(&self, account_id: &str, message_id: &str) -> ImapResult<()> {
        self.require_owned(account_id)?;
        self.capability.delete_message(account_id, message_id).await
    }

    pub async fn queue_message(&self, account_id: &str, raw: &[u8]) -> ImapResult<String> {
        self.require_owned(account_id)?;
        self.capability.queue_message(account_id, raw).await
    }

    pub async fn upload_message(&self, account_id: &str, mailbox: &str, raw: &[u8]) -> ImapResult<String> {
        self.require_owned(account_id)?;
        self.capability.upload_message(account_id, mailbox, raw).await
    }

    pub async fn create_mailbox(&self, account_id: &str, name: &str) -> ImapResult<()> {
        self.require_owned(account_id)?;
        self.capability.create_mailbox(account_id, name).await
    }

    pub async fn delete_mailbox(&self, account_id: &str, name: &str) -> ImapResult<()> {
        self.require_owned(account_id)?;
        self.capability.delete_mailbox(account_id, name).await
    }

    pub async fn build_contacts(&self, account_id: &str) -> ImapResult<serde_json::Value> {
        self.require_owned(account_id)?;
        self.capability.build_contacts(account_id).await
    }

    fn require_owned(&self, account_id: &str) -> ImapResult<()> {
        if self.owns(account_id) {
            Ok(())
        } else {
            warn!(account = account_id, worker = %self.id, "rpc for unowned account");
            Err(ImapError::NotOwned(account_id.to_string()))
        }
    }
}

/// Spawns an IMAP worker task owning its own `ImapWorker`, registers it
/// with the supervisor, and drives it from the control channel (spec
/// 4.3/4.4: the supervisor routes `assign`/`delete`/account-scoped
/// `Call`s here; the worker answers calls directly via
/// `Supervisor::resolve_call` rather than a reverse channel).
pub fn spawn(
    id: impl Into<String>,
    capability: Box<dyn ImapCapability>,
    notify_queue: Queue,
    registry: Arc<AccountRegistry>,
    supervisor: Arc<Supervisor>,
) -> tokio::task::JoinHandle<()> {
    let id = id.into();
    let (tx, mut rx) = mpsc::unbounded_channel();
    supervisor.register_worker(WorkerHandle { id: id.clone(), tx });

    tokio::spawn(async move {
        {
            let mut assignment = supervisor.assignment().lock().await;
            assignment.on_worker_ready(id.clone());
        }

        let mut worker = ImapWorker::new(id.clone(), capability, notify_queue);
        while let Some(message) = rx.recv().await {
            match message {
                ControlMessage::Assign { account_id, worker_id } if worker_id == worker.id => {
                    handle_assign(&mut worker, &registry, account_id).await;
                }
                ControlMessage::Delete { account_id } => {
                    let _ = worker.capability_disconnect(&account_id).await;
                    worker.unassign(&account_id);
                }
                ControlMessage::Call { mid, payload } => {
                    let result = handle_call(&worker, payload).await;
                    supervisor.resolve_call(mid, result);
                }
                _ => {}
            }
        }

        // The control channel closed (supervisor dropped, or process
        // shutting down): every account this worker still owns is about
        // to be orphaned, so surface the cooling window (spec 4.3) before
        // handing off to the assignment controller.
        let owned: Vec<String> = worker.connections.keys().cloned().collect();
        for account_id in owned {
            if let Err(e) = worker.transition(&account_id, ConnectionState::Disconnected) {
                warn!(account = %account_id, worker = %worker.id, error = %e, "failed to mark account disconnected on worker exit");
            }
        }
        supervisor.worker_exit(&worker.id).await;
    })
}

/// Spec 4.4: opens the connection and drives it through
/// `Connecting → Syncing → Connected`, recording `ConnectError` on
/// failure. Caller already holds no lock; state transitions are local
/// to this worker's in-process map.
async fn handle_assign(worker: &mut ImapWorker, registry: &AccountRegistry, account_id: String) {
    let notify_from = registry
        .load(&account_id)
        .await
        .ok()
        .flatten()
        .map(|a| a.meta.notify_from)
        .unwrap_or_else(Utc::now);
    worker.assign(account_id.clone(), notify_from);

    if let Err(e) = worker.transition(&account_id, ConnectionState::Connecting) {
        warn!(account = %account_id, worker = %worker.id, error = %e, "invalid transition to connecting");
        return;
    }
    match worker.capability_connect(&account_id).await {
        Ok(()) => {
            if let Err(e) = worker.transition(&account_id, ConnectionState::Syncing) {
                warn!(account = %account_id, worker = %worker.id, error = %e, "invalid transition to syncing");
                return;
            }
            if let Err(e) = worker.transition(&account_id, ConnectionState::Connected) {
                warn!(account = %account_id, worker = %worker.id, error = %e, "invalid transition to connected");
                return;
            }
            info!(account = %account_id, worker = %worker.id, "account connected");
        }
        Err(e) => {
            warn!(account = %account_id, worker = %worker.id, error = %e, "connect failed");
            if let Err(e) = worker.transition(&account_id, ConnectionState::ConnectError) {
                warn!(account = %account_id, worker = %worker.id, error = %e, "invalid transition to connect_error");
            }
        }
    }
}

/// Spec 6: routes a `Call` to the matching capability RPC, folding the
/// outcome into `{code, statusCode, message}` (spec 7). Covers every
/// operation spec 4.4 documents for the capability trait.
async fn handle_call(worker: &ImapWorker, payload: CallPayload) -> CallResult {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    match payload {
        CallPayload::ListMessages { account_id, mailbox } => {
            match worker.list_messages(&account_id, &mailbox).await {
                Ok(value) => CallResult::Ok(value),
                Err(e) => call_err(e),
            }
        }
        CallPayload::GetMessage { account_id, message_id } => {
            match worker.get_message(&account_id, &message_id).await {
                Ok(value) => CallResult::Ok(value),
                Err(e) => call_err(e),
            }
        }
        CallPayload::GetText { account_id, message_id } => {
            match worker.get_text(&account_id, &message_id).await {
                Ok(text) => CallResult::Ok(serde_json::json!({"text": text})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::GetRawMessage { account_id, message_id } => {
            match worker.get_raw_message(&account_id, &message_id).await {
                Ok(raw) => CallResult::Ok(serde_json::json!({"rawBase64": STANDARD.encode(raw)})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::GetAttachment { account_id, message_id, part } => {
            match worker.get_attachment(&account_id, &message_id, &part).await {
                Ok(raw) => CallResult::Ok(serde_json::json!({"rawBase64": STANDARD.encode(raw)})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::UpdateMessage { account_id, message_id, flags } => {
            match worker.update_message(&account_id, &message_id, flags).await {
                Ok(()) => CallResult::Ok(serde_json::json!({"status": "updated"})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::MoveMessage { account_id, message_id, to_mailbox } => {
            match worker.move_message(&account_id, &message_id, &to_mailbox).await {
                Ok(()) => CallResult::Ok(serde_json::json!({"status": "moved"})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::DeleteMessage { account_id, message_id } => {
            match worker.delete_message(&account_id, &message_id).await {
                Ok(()) => CallResult::Ok(serde_json::json!({"status": "deleted"})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::SubmitMessage { account_id, queue_id, message_id } => {
            match worker.submit_message(&account_id, &queue_id, &message_id).await {
                Ok(()) => CallResult::Ok(serde_json::json!({"status": "submitted"})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::QueueMessage { account_id, raw_base64 } => {
            let raw = match STANDARD.decode(raw_base64) {
                Ok(raw) => raw,
                Err(e) => return decode_err(e),
            };
            match worker.queue_message(&account_id, &raw).await {
                Ok(queue_id) => CallResult::Ok(serde_json::json!({"queueId": queue_id})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::UploadMessage { account_id, mailbox, raw_base64 } => {
            let raw = match STANDARD.decode(raw_base64) {
                Ok(raw) => raw,
                Err(e) => return decode_err(e),
            };
            match worker.upload_message(&account_id, &mailbox, &raw).await {
                Ok(message_id) => CallResult::Ok(serde_json::json!({"messageId": message_id})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::CreateMailbox { account_id, name } => {
            match worker.create_mailbox(&account_id, &name).await {
                Ok(()) => CallResult::Ok(serde_json::json!({"status": "created"})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::DeleteMailbox { account_id, name } => {
            match worker.delete_mailbox(&account_id, &name).await {
                Ok(()) => CallResult::Ok(serde_json::json!({"status": "deleted"})),
                Err(e) => call_err(e),
            }
        }
        CallPayload::BuildContacts { account_id } => {
            match worker.build_contacts(&account_id).await {
                Ok(value) => CallResult::Ok(value),
                Err(e) => call_err(e),
            }
        }
    }
}

fn decode_err(e: base64::DecodeError) -> CallResult {
    CallResult::Err {
        code: "BadRequest".to_string(),
        status_code: 400,
        message: format!("invalid base64 payload: {e}"),
    }
}

fn call_err(e: ImapError) -> CallResult {
    CallResult::Err {
        code: "ImapError".to_string(),
        status_code: e.status_code(),
        message: e.to_string(),
    }
}

/// Placeholder [`ImapCapability`] used until a real wire-protocol
/// client (out of scope here, spec 1) is wired in. Connects
/// immediately and fails every message operation with
/// [`ImapError::Capability`], so a worker spawned with it is inert
/// rather than silently wrong.
pub struct UnimplementedCapability;

#[async_trait]
impl ImapCapability for UnimplementedCapability {
    async fn connect(&self, _account_id: &str) -> ImapResult<()> {
        Ok(())
    }
    async fn disconnect(&self, _account_id: &str) -> ImapResult<()> {
        Ok(())
    }
    async fn list_messages(&self, _account_id: &str, _mailbox: &str) -> ImapResult<serde_json::Value> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn get_message(&self, _account_id: &str, _message_id: &str) -> ImapResult<serde_json::Value> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn get_text(&self, _account_id: &str, _message_id: &str) -> ImapResult<String> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn get_raw_message(&self, _account_id: &str, _message_id: &str) -> ImapResult<Vec<u8>> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn get_attachment(&self, _account_id: &str, _message_id: &str, _part: &str) -> ImapResult<Vec<u8>> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn update_message(&self, _account_id: &str, _message_id: &str, _flags: serde_json::Value) -> ImapResult<()> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn move_message(&self, _account_id: &str, _message_id: &str, _to_mailbox: &str) -> ImapResult<()> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn delete_message(&self, _account_id: &str, _message_id: &str) -> ImapResult<()> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn submit_message(&self, _account_id: &str, _queue_id: &str, _message_id: &str) -> ImapResult<()> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn queue_message(&self, _account_id: &str, _raw: &[u8]) -> ImapResult<String> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn upload_message(&self, _account_id: &str, _mailbox: &str, _raw: &[u8]) -> ImapResult<String> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn create_mailbox(&self, _account_id: &str, _name: &str) -> ImapResult<()> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn delete_mailbox(&self, _account_id: &str, _name: &str) -> ImapResult<()> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
    async fn build_contacts(&self, _account_id: &str) -> ImapResult<serde_json::Value> {
        Err(ImapError::Capability("IMAP client not configured".to_string()))
    }
}

impl ImapWorker {
    async fn capability_connect(&self, account_id: &str) -> ImapResult<()> {
        self.capability.connect(account_id).await
    }

    async fn capability_disconnect(&self, account_id: &str) -> ImapResult<()> {
        self.capability.disconnect(account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_table_matches_spec_4_4() {
        use ConnectionState::*;
        assert!(Init.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Syncing));
        assert!(Connecting.can_transition_to(AuthenticationError));
        assert!(Syncing.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Init.can_transition_to(Connected));
        assert!(AuthenticationError.can_transition_to(Connecting));
    }

    #[test]
    fn unset_is_reachable_from_any_state() {
        assert!(ConnectionState::Connected.can_transition_to(ConnectionState::Unset));
        assert!(ConnectionState::Init.can_transition_to(ConnectionState::Unset));
    }
}
