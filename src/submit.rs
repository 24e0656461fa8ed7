//! Submission Worker (spec 4.5: C6). Pulls `submit` jobs off the queue,
//! dispatches them to the owning IMAP worker via the supervisor's RPC
//! surface, and reconciles the outcome against the queue and the
//! per-account blob store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::supervisor::{CallPayload, CallResult, Supervisor};
use mailengine_kv::KvStore;
use mailengine_queue::{Job, JobOutcome, Queue, Worker, WorkerConfig};
use mailengine_webhooks::{EventEnvelope, EventKind};

/// `submit` job payload (spec 6): `{account, queueId, messageId}`. `qId`
/// is accepted as an alias but never emitted (spec 9, open question 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub account: String,
    #[serde(alias = "qId")]
    pub queue_id: String,
    pub message_id: String,
}

fn blob_key(account: &str, queue_id: &str) -> String {
    format!("iaq:{account}:{queue_id}")
}

/// Runs spec 4.5's 5-step algorithm for one reserved job.
async fn handle_submit_job(
    job: Job,
    kv: Arc<KvStore>,
    supervisor: Arc<Supervisor>,
    notify_queue: Queue,
) -> JobOutcome {
    let payload: SubmitPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => return JobOutcome::Discard(format!("malformed submit payload: {e}")),
    };

    // Step 1: load the blob; a missing blob means the job was already
    // handled (or superseded) — drop it silently rather than retry.
    let key = blob_key(&payload.account, &payload.queue_id);
    match kv.exists(&key).await {
        Ok(false) => {
            info!(account = %payload.account, queue_id = %payload.queue_id, "blob missing, dropping job silently");
            return JobOutcome::Ack(None);
        }
        Err(e) => return JobOutcome::Retry(format!("blob lookup failed: {e}")),
        Ok(true) => {}
    }

    // Step 2: RPC submitMessage via the supervisor.
    let rpc_result = supervisor
        .call(
            &payload.account,
            CallPayload::SubmitMessage {
                account_id: payload.account.clone(),
                queue_id: payload.queue_id.clone(),
                message_id: payload.message_id.clone(),
            },
        )
        .await;

    let (status_code, error_message) = match rpc_result {
        Ok(CallResult::Ok(_)) => (200u16, None),
        Ok(CallResult::Err { status_code, message, .. }) => (status_code, Some(message)),
        Err(e) => (e.status_code_hint(), Some(e.to_string())),
    };

    if status_code < 400 {
        // Step 3: progress processing → submitted.
        let _ = kv.delete(&key).await;
        return JobOutcome::Ack(Some(serde_json::json!({"status": "submitted"})));
    }

    let error = error_message.unwrap_or_else(|| "submission failed".to_string());

    // Step 4: statusCode >= 500 is a permanent remote failure (spec 7);
    // discard rather than retry. 4xx/transport let the default retry
    // policy apply.
    if status_code >= 500 {
        finalize_terminal(&kv, &notify_queue, &payload, &error).await;
        return JobOutcome::Discard(error);
    }

    if job.attempts_made + 1 >= job.max_attempts {
        finalize_terminal(&kv, &notify_queue, &payload, &error).await;
    }
    JobOutcome::Retry(error)
}

/// Step 5: on terminal failure, delete the blob and enqueue
/// `messageFailed` (spec 4.5).
async fn finalize_terminal(kv: &KvStore, notify_queue: &Queue, payload: &SubmitPayload, error: &str) {
    let key = blob_key(&payload.account, &payload.queue_id);
    if let Err(e) = kv.delete(&key).await {
        warn!(account = %payload.account, error = %e, "failed to delete submission blob");
    }

    let envelope = EventEnvelope::new(
        payload.account.clone(),
        EventKind::MessageFailed,
        serde_json::json!({"messageId": payload.message_id, "error": error}),
    );
    if let Ok(body) = serde_json::to_value(&envelope)
        && let Err(e) = notify_queue
            .enqueue(body, mailengine_queue::EnqueueOptions {
                max_attempts: 10,
                backoff: mailengine_queue::Backoff::new(5000),
                ..Default::default()
            })
            .await
    {
        warn!(account = %payload.account, error = %e, "failed to enqueue messageFailed notification");
    }
}

/// Builds the polling worker that drives `submit` jobs (spec 4.5).
pub fn spawn(
    id: impl Into<String>,
    submit_queue: Queue,
    notify_queue: Queue,
    kv: Arc<KvStore>,
    supervisor: Arc<Supervisor>,
    config: WorkerConfig,
) -> Worker {
    Worker::with_config(id, submit_queue, config, move |job| {
        let kv = kv.clone();
        let supervisor = supervisor.clone();
        let notify_queue = notify_queue.clone();
        async move { handle_submit_job(job, kv, supervisor, notify_queue).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_layout_matches_spec_6() {
        assert_eq!(blob_key("a1", "q9"), "iaq:a1:q9");
    }

    #[test]
    fn submit_payload_accepts_q_id_alias_but_field_is_queue_id() {
        let v = serde_json::json!({"account": "a1", "qId": "q9", "messageId": "m1"});
        let payload: SubmitPayload = serde_json::from_value(v).unwrap();
        assert_eq!(payload.queue_id, "q9");

        let serialized = serde_json::to_value(&payload).unwrap();
        assert!(serialized.get("queueId").is_some());
        assert!(serialized.get("qId").is_none());
    }
}
