//! Supervisor (spec 4.7: C8). Spawns and monitors worker tasks, routes
//! cross-worker RPC, and aggregates metrics.
//!
//! Two supplementary features grounded in the spec's own Design Notes
//! (section 9, "dynamic request/response call queue" and "tagged
//! messages"): [`CallTable`], a correlation map keyed by message id, and
//! [`ControlMessage`], a tagged enum replacing the source's duck-typed
//! messages.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::account::Account;
use crate::assign::AssignmentController;

pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Spec 7: "Missing owner ... statusCode 503".
    #[error("No active handler for requested account: {0}")]
    NoActiveHandler(String),

    /// Spec 7: "Timeout ... statusCode 504".
    #[error("RPC timed out: {0}")]
    Timeout(String),

    #[error("worker channel closed: {0}")]
    ChannelClosed(String),
}

impl SupervisorError {
    /// Maps an RPC-layer failure to the status code spec 7 assigns it
    /// (missing owner → 503, timeout → 504), for callers that need to
    /// fold an RPC error into an HTTP-style status branch (e.g. the
    /// submission worker's retry-vs-discard decision).
    pub fn status_code_hint(&self) -> u16 {
        match self {
            SupervisorError::NoActiveHandler(_) => 503,
            SupervisorError::Timeout(_) => 504,
            SupervisorError::ChannelClosed(_) => 503,
        }
    }
}

/// Tagged control-channel message (spec 9: replaces "prototype-based
/// objects and duck-typed messages"; spec 6: the two message families).
#[derive(Debug, Clone)]
pub enum ControlMessage {
    New { account: Account },
    Delete { account_id: String },
    Update { account: Account },
    Assign { account_id: String, worker_id: String },
    Settings { key: String, value: serde_json::Value },
    Metrics { counter: String, value: f64 },
    Change { account_id: String, kind: String },
    Ready { worker_id: String },
    SmtpReload,
    CountConnections,
    /// Fire-and-forget → response pair (spec 6: `{cmd, mid, message}` /
    /// `{cmd: resp, mid, response | error}`).
    Call { mid: u64, payload: CallPayload },
    Resp { mid: u64, result: CallResult },
}

/// One account-scoped RPC the supervisor can route to the owning IMAP
/// worker (spec 4.4's operation list). Binary payloads travel as
/// base64, matching the wire convention the HTTP API layer (out of
/// scope here) uses for message bodies.
#[derive(Debug, Clone)]
pub enum CallPayload {
    ListMessages { account_id: String, mailbox: String },
    GetMessage { account_id: String, message_id: String },
    GetText { account_id: String, message_id: String },
    GetRawMessage { account_id: String, message_id: String },
    GetAttachment { account_id: String, message_id: String, part: String },
    UpdateMessage { account_id: String, message_id: String, flags: serde_json::Value },
    MoveMessage { account_id: String, message_id: String, to_mailbox: String },
    DeleteMessage { account_id: String, message_id: String },
    SubmitMessage { account_id: String, queue_id: String, message_id: String },
    QueueMessage { account_id: String, raw_base64: String },
    UploadMessage { account_id: String, mailbox: String, raw_base64: String },
    CreateMailbox { account_id: String, name: String },
    DeleteMailbox { account_id: String, name: String },
    BuildContacts { account_id: String },
}

#[derive(Debug, Clone)]
pub enum CallResult {
    Ok(serde_json::Value),
    Err { code: String, message: String, status_code: u16 },
}

/// Pending outbound call: a reply channel plus a deadline. A background
/// sweep (or an inline check on each `call`) expires stale entries and
/// fulfills them with [`SupervisorError::Timeout`] (spec 9).
struct PendingCall {
    reply: oneshot::Sender<CallResult>,
    deadline: DateTime<Utc>,
}

/// Generic correlation map keyed by message id (spec 9: "Replace with a
/// correlation map `id → (replyChannel, deadline)`").
pub struct CallTable<T = CallResult> {
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<T>>,
}

impl<T> Default for CallTable<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }
}

impl<T> CallTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new outstanding call and returns its id plus a
    /// receiver that resolves when [`CallTable::resolve`] is called with
    /// the same id, or is dropped on timeout.
    pub fn begin(&self) -> (u64, oneshot::Receiver<T>) {
        let mid = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(mid, tx);
        (mid, rx)
    }

    /// Delivers a response to the caller awaiting `mid`. No-op if the
    /// entry already expired.
    pub fn resolve(&self, mid: u64, value: T) -> bool {
        if let Some((_, sender)) = self.pending.remove(&mid) {
            sender.send(value).is_ok()
        } else {
            false
        }
    }

    pub fn cancel(&self, mid: u64) {
        self.pending.remove(&mid);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// A handle the supervisor holds for a spawned worker task.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: String,
    pub tx: tokio::sync::mpsc::UnboundedSender<ControlMessage>,
}

/// Spawns, monitors, and routes RPC to worker tasks (spec 4.7).
pub struct Supervisor {
    config: crate::config::SupervisorConfig,
    assignment: Mutex<AssignmentController>,
    workers: DashMap<String, WorkerHandle>,
    calls: CallTable<CallResult>,
    metrics: DashMap<String, f64>,
    broadcast_tx: broadcast::Sender<ControlMessage>,
    closing: std::sync::atomic::AtomicBool,
}

impl Supervisor {
    pub fn new(config: crate::config::SupervisorConfig) -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(1024);
        Self {
            config,
            assignment: Mutex::new(AssignmentController::new()),
            workers: DashMap::new(),
            calls: CallTable::new(),
            metrics: DashMap::new(),
            broadcast_tx,
            closing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlMessage> {
        self.broadcast_tx.subscribe()
    }

    /// State-change messages broadcast to all API workers (spec 4.7).
    pub fn broadcast(&self, message: ControlMessage) {
        let _ = self.broadcast_tx.send(message);
    }

    pub fn register_worker(&self, handle: WorkerHandle) {
        info!(worker = %handle.id, "worker registered");
        self.workers.insert(handle.id.clone(), handle);
    }

    /// Spec 4.3: "On worker exit: for each owned account, remove from
    /// `assigned`, add back to `unassigned`, apply `reconnectDelay`." The
    /// accounts land back in `unassigned` as part of this call, so the
    /// next `spawn_assignment_loop` tick picks them up without further
    /// routing.
    pub async fn worker_exit(&self, worker_id: &str) {
        warn!(worker = %worker_id, "worker exited");
        self.workers.remove(worker_id);
        let orphaned = {
            let mut assignment = self.assignment.lock().await;
            assignment.on_worker_exit(worker_id)
        };
        for (account_id, delay) in orphaned {
            info!(account = %account_id, worker = %worker_id, delay_ms = delay.as_millis(), "account orphaned, awaiting reassignment");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Account-scoped RPC → owning IMAP worker via the assignment map
    /// (spec 4.7). Returns [`SupervisorError::NoActiveHandler`] if the
    /// account is currently unowned (defense-in-depth, matches the
    /// per-worker `{error, statusCode: 503}` the spec also mandates at
    /// C5 itself).
    pub async fn call(&self, account_id: &str, payload: CallPayload) -> SupervisorResult<CallResult> {
        let owner = {
            let assignment = self.assignment.lock().await;
            assignment.owner_of(account_id).cloned()
        };
        let Some(owner_id) = owner else {
            return Err(SupervisorError::NoActiveHandler(account_id.to_string()));
        };
        let Some(handle) = self.workers.get(&owner_id) else {
            return Err(SupervisorError::NoActiveHandler(account_id.to_string()));
        };

        let (mid, rx) = self.calls.begin();
        handle
            .tx
            .send(ControlMessage::Call { mid, payload })
            .map_err(|_| SupervisorError::ChannelClosed(owner_id.clone()))?;

        match timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(SupervisorError::ChannelClosed(owner_id)),
            Err(_) => {
                self.calls.cancel(mid);
                Err(SupervisorError::Timeout(format!("mid={mid}")))
            }
        }
    }

    /// Fulfils a pending call (invoked by the routing loop when a
    /// worker sends back `ControlMessage::Resp`).
    pub fn resolve_call(&self, mid: u64, result: CallResult) {
        self.calls.resolve(mid, result);
    }

    /// Metric updates → central counters; also persisted to daily
    /// histograms in C1 (spec 4.7) by the caller, which owns the KV
    /// handle — this just aggregates the in-process counter.
    pub fn record_metric(&self, counter: &str, value: f64) {
        *self.metrics.entry(counter.to_string()).or_insert(0.0) += value;
    }

    pub fn metric_snapshot(&self) -> HashMap<String, f64> {
        self.metrics.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    pub fn assignment(&self) -> &Mutex<AssignmentController> {
        &self.assignment
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    /// Spec 5: "On SIGTERM/SIGINT, the supervisor marks `closing`,
    /// instructs queue schedulers to drain, waits up to ~2.5s, then
    /// exits."
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::Relaxed);
        info!("supervisor closing, draining for {:?}", self.config.shutdown_grace);
        tokio::time::sleep(self.config.shutdown_grace).await;
    }

    /// Spec 4.3: periodically runs `assignCycle` and RPC-assigns the
    /// resulting `(account, worker)` pairs. Serializes with the
    /// assignment mutex so cycles never overlap (spec 5).
    /// Drives the assignment controller's `new`/`delete` transitions
    /// from broadcast control messages (spec 4.3: "On control-channel
    /// message `new`: add to unassigned"; "On `delete`: ... if
    /// currently assigned, send `delete` to owning worker"), since
    /// [`AccountRegistry`](crate::registry::AccountRegistry) only
    /// broadcasts — it has no reference to the assignment map itself.
    pub fn spawn_broadcast_router(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let supervisor = self;
        let mut rx = supervisor.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ControlMessage::New { account }) => {
                        let mut assignment = supervisor.assignment.lock().await;
                        assignment.on_account_new(account.id);
                    }
                    Ok(ControlMessage::Delete { account_id }) => {
                        let owner = {
                            let mut assignment = supervisor.assignment.lock().await;
                            assignment.on_account_delete(&account_id)
                        };
                        if let Some(owner_id) = owner
                            && let Some(handle) = supervisor.workers.get(&owner_id)
                        {
                            let _ = handle.tx.send(ControlMessage::Delete { account_id });
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "broadcast router lagged, some control messages were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn spawn_assignment_loop(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let supervisor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if supervisor.is_closing() {
                    break;
                }
                let assignments = {
                    let mut assignment = supervisor.assignment.lock().await;
                    assignment.assign_cycle()
                };
                for (account_id, worker_id) in assignments {
                    if let Some(handle) = supervisor.workers.get(&worker_id) {
                        let _ = handle.tx.send(ControlMessage::Assign {
                            account_id,
                            worker_id: worker_id.clone(),
                        });
                    }
                }
            }
        })
    }
}

/// Set of worker ids currently accepting new account assignments.
pub type AvailableWorkers = HashSet<String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_table_resolve_delivers_value_once() {
        let table: CallTable<u32> = CallTable::new();
        let (mid, rx) = table.begin();
        assert!(table.resolve(mid, 42));
        assert_eq!(rx.await.unwrap(), 42);
        assert!(!table.resolve(mid, 7));
    }

    #[tokio::test]
    async fn supervisor_call_without_owner_is_missing_handler() {
        let supervisor = Supervisor::new(crate::config::SupervisorConfig::default());
        let result = supervisor
            .call(
                "acct-1",
                CallPayload::ListMessages {
                    account_id: "acct-1".into(),
                    mailbox: "INBOX".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(SupervisorError::NoActiveHandler(_))));
    }
}
