//! Notification Worker (spec 4.6: C7). Pulls `notify` jobs off the
//! queue and delivers them to each account's webhook endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use mailengine_kv::KvStore;
use mailengine_queue::{Job, JobOutcome, Worker, WorkerConfig};
use mailengine_webhooks::{DeliveryOutcome, EventEnvelope, EventKind, WebhookClient, WebhookConfig};

use crate::registry::AccountRegistry;
use crate::stats::StatsRecorder;

fn webhook_settings_key(account: &str) -> String {
    format!("iad:{account}:webhook")
}

/// Persisted per-account webhook settings (spec 4.6 step 1), loaded
/// fresh for every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `None` subscribes to every event kind, matching
    /// `WebhookConfig::new`'s default (spec 4.6 step 1).
    #[serde(default)]
    pub events: Option<Vec<EventKind>>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub include_text: bool,
    #[serde(default)]
    pub text_size_cap: usize,
}

fn default_true() -> bool {
    true
}

async fn load_webhook_config(
    kv: &KvStore,
    account: &str,
    defaults: &crate::config::WebhookDefaults,
) -> Option<WebhookConfig> {
    let json: Option<String> = kv.get_value(&webhook_settings_key(account)).await.ok().flatten();
    let settings: WebhookSettings = json.and_then(|j| serde_json::from_str(&j).ok())?;

    let mut builder = WebhookConfig::builder(settings.url)
        .enabled(settings.enabled && defaults.enabled)
        .include_text(settings.include_text, settings.text_size_cap)
        .timeout(defaults.timeout);
    if let Some(events) = settings.events {
        builder = builder.events(events.into_iter().collect());
    }
    for (key, value) in settings.headers {
        builder = builder.header(key, value);
    }

    Some(builder.build())
}

/// Runs spec 4.6's 7-step algorithm for one reserved `notify` job.
async fn handle_notify_job(
    job: Job,
    kv: Arc<KvStore>,
    registry: Arc<AccountRegistry>,
    client: Arc<WebhookClient>,
    webhook_defaults: crate::config::WebhookDefaults,
    stats: Arc<StatsRecorder>,
) -> JobOutcome {
    let envelope: EventEnvelope = match serde_json::from_value(job.payload.clone()) {
        Ok(e) => e,
        Err(e) => return JobOutcome::Discard(format!("malformed notify payload: {e}")),
    };

    // Steps 1-2: load config, skip if disabled or unsubscribed.
    let Some(config) = load_webhook_config(&kv, &envelope.account, &webhook_defaults).await else {
        return JobOutcome::Ack(Some(serde_json::json!({"status": "skipped", "reason": "no webhook configured"})));
    };

    // Steps 3-6 (basic-auth extraction, signing, POST, status
    // classification) live in the webhook client.
    // Step 7: histogram of request duration and counters by status.
    match client.deliver(&config, &envelope).await {
        Ok(DeliveryOutcome::Skipped) => JobOutcome::Ack(Some(serde_json::json!({"status": "skipped"}))),
        Ok(DeliveryOutcome::Delivered { status, duration_ms }) => {
            info!(account = %envelope.account, status, duration_ms, "webhook delivered");
            stats.record("webhook.duration_ms", duration_ms as f64).await;
            stats.incr(&format!("webhook.status.{status}")).await;
            JobOutcome::Ack(Some(serde_json::json!({"status": "delivered", "httpStatus": status})))
        }
        Ok(DeliveryOutcome::Gone { status }) => {
            // Step 5: disable webhooks for this account, then ack.
            warn!(account = %envelope.account, status, "disabling webhooks, endpoint gone");
            stats.incr(&format!("webhook.status.{status}")).await;
            if let Err(e) = disable_webhooks(&kv, &registry, &envelope.account).await {
                warn!(account = %envelope.account, error = %e, "failed to persist webhook disable");
            }
            JobOutcome::Ack(Some(serde_json::json!({"status": "disabled", "httpStatus": status})))
        }
        Ok(DeliveryOutcome::Retry { reason, duration_ms }) => {
            warn!(account = %envelope.account, reason = %reason, duration_ms, "webhook delivery failed, retrying");
            stats.record("webhook.duration_ms", duration_ms as f64).await;
            stats.incr("webhook.status.retry").await;
            JobOutcome::Retry(reason)
        }
        Err(e) => {
            stats.incr("webhook.status.error").await;
            JobOutcome::Retry(e.to_string())
        }
    }
}

async fn disable_webhooks(
    kv: &KvStore,
    registry: &AccountRegistry,
    account_id: &str,
) -> mailengine_kv::Result<()> {
    let key = webhook_settings_key(account_id);
    let json: Option<String> = kv.get_value(&key).await?;
    if let Some(json) = json
        && let Ok(mut settings) = serde_json::from_str::<WebhookSettings>(&json)
    {
        settings.enabled = false;
        if let Ok(updated) = serde_json::to_string(&settings) {
            kv.set_value(&key, updated).await?;
        }
    }
    registry.append_log(account_id, &serde_json::json!({"event": "webhooksDisabled"}), 200).await.ok();
    Ok(())
}

/// Builds the polling worker that drives `notify` jobs (spec 4.6).
pub fn spawn(
    id: impl Into<String>,
    notify_queue: mailengine_queue::Queue,
    kv: Arc<KvStore>,
    registry: Arc<AccountRegistry>,
    client: Arc<WebhookClient>,
    webhook_defaults: crate::config::WebhookDefaults,
    stats: Arc<StatsRecorder>,
    config: WorkerConfig,
) -> Worker {
    Worker::with_config(id, notify_queue, config, move |job| {
        let kv = kv.clone();
        let registry = registry.clone();
        let client = client.clone();
        let webhook_defaults = webhook_defaults.clone();
        let stats = stats.clone();
        async move { handle_notify_job(job, kv, registry, client, webhook_defaults, stats).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_settings_key_layout() {
        assert_eq!(webhook_settings_key("a1"), "iad:a1:webhook");
    }

    #[test]
    fn webhook_settings_default_to_enabled() {
        let settings: WebhookSettings = serde_json::from_str(r#"{"url":"https://example.com/hook"}"#).unwrap();
        assert!(settings.enabled);
        assert!(settings.events.is_none());
        assert!(settings.headers.is_empty());
    }

    #[test]
    fn webhook_settings_parse_event_filter_and_headers() {
        let json = r#"{
            "url": "https://example.com/hook",
            "events": ["messageNew", "messageDeleted"],
            "headers": {"X-Tenant": "acme"},
            "includeText": true,
            "textSizeCap": 2048
        }"#;
        let settings: WebhookSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.events.unwrap().len(), 2);
        assert_eq!(settings.headers.get("X-Tenant").unwrap(), "acme");
        assert!(settings.include_text);
        assert_eq!(settings.text_size_cap, 2048);
    }
}
