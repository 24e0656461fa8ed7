//! Top-level engine configuration (SPEC_FULL.md 10.3), composing each
//! component's own config the way `armature-redis::RedisConfig` is
//! composed by application-level config in the teacher.

use mailengine_kv::{KvConfig, KvStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Defaults applied to a newly-registered account's webhook config
/// before the account owner customizes it (spec 4.6 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDefaults {
    pub enabled: bool,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for WebhookDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(30),
            user_agent: format!("mailengine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Number of IMAP worker tasks to spawn.
    pub imap_workers: usize,
    /// Number of submission worker tasks.
    pub submit_workers: usize,
    /// Number of notification worker tasks.
    pub notify_workers: usize,
    /// Default RPC call timeout (spec 4.7: "10 s default timeout").
    pub call_timeout: Duration,
    /// Graceful shutdown drain budget (spec 5: "waits up to ~2.5 s").
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            imap_workers: 3,
            submit_workers: 2,
            notify_workers: 2,
            call_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_millis(2500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDefaults {
    pub submit_max_attempts: u32,
    pub submit_base_delay_ms: u64,
    pub notify_max_attempts: u32,
    pub notify_base_delay_ms: u64,
    pub queue_keep: Option<u64>,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            submit_max_attempts: 3,
            submit_base_delay_ms: 1000,
            // spec 4.4: "Queue.enqueue('notify', envelope, {attempts: 10, backoff: exp/5s})"
            notify_max_attempts: 10,
            notify_base_delay_ms: 5000,
            queue_keep: Some(1000),
        }
    }
}

/// Composed configuration for the whole engine binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub kv: KvConfig,
    pub queue: QueueDefaults,
    pub supervisor: SupervisorConfig,
    pub webhook_defaults: WebhookDefaults,
    /// HMAC key used to sign webhook bodies (GLOSSARY: "Service secret").
    pub service_secret: String,
    /// Optional key that encrypts credential fields at rest (GLOSSARY:
    /// "Encryption secret"); `None` means secrets are stored plaintext
    /// and explicitly flagged as such (I5).
    pub encryption_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kv: KvConfig::default(),
            queue: QueueDefaults::default(),
            supervisor: SupervisorConfig::default(),
            webhook_defaults: WebhookDefaults::default(),
            service_secret: String::new(),
            encryption_secret: None,
        }
    }
}

impl EngineConfig {
    /// Loads `.env` (if present) then reads well-known environment
    /// variables, mirroring `mailengine_kv::KvConfig::from_env`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self {
            kv: KvConfig::from_env().build(),
            ..Self::default()
        };

        // GLOSSARY: "Service secret ... auto-generated on first start if
        // not configured." Left empty here; `resolve_service_secret`
        // fills it in once a KV handle exists.
        config.service_secret = std::env::var("MAILENGINE_SERVICE_SECRET").unwrap_or_default();

        config.encryption_secret = std::env::var("MAILENGINE_ENCRYPTION_SECRET").ok();

        if let Ok(n) = std::env::var("MAILENGINE_IMAP_WORKERS")
            && let Ok(n) = n.parse()
        {
            config.supervisor.imap_workers = n;
        }
        if let Ok(n) = std::env::var("MAILENGINE_SUBMIT_WORKERS")
            && let Ok(n) = n.parse()
        {
            config.supervisor.submit_workers = n;
        }
        if let Ok(n) = std::env::var("MAILENGINE_NOTIFY_WORKERS")
            && let Ok(n) = n.parse()
        {
            config.supervisor.notify_workers = n;
        }

        Ok(config)
    }
}

const SETTINGS_KEY: &str = "settings";
const SERVICE_SECRET_FIELD: &str = "serviceSecret";

/// Resolves the service secret (GLOSSARY: HMAC key for webhook signing
/// and API tokens). If one was configured via environment, it wins and
/// is persisted so the `settings` hash reflects the effective value. If
/// none is configured, the `settings` hash is consulted first (so the
/// same secret survives a restart); only on true first-start is a new
/// one generated and persisted.
pub async fn resolve_service_secret(kv: &KvStore, configured: &str) -> Result<String> {
    if !configured.is_empty() {
        kv.hset(SETTINGS_KEY, SERVICE_SECRET_FIELD, configured).await?;
        return Ok(configured.to_string());
    }

    if let Some(existing) = kv.hget::<String>(SETTINGS_KEY, SERVICE_SECRET_FIELD).await?
        && !existing.is_empty()
    {
        return Ok(existing);
    }

    let generated = generate_secret();
    kv.hset(SETTINGS_KEY, SERVICE_SECRET_FIELD, &generated).await?;
    tracing::info!("generated and persisted a new service secret on first start");
    Ok(generated)
}

fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_defaults_match_spec_notify_backoff() {
        let defaults = QueueDefaults::default();
        assert_eq!(defaults.notify_max_attempts, 10);
        assert_eq!(defaults.notify_base_delay_ms, 5000);
    }

    #[test]
    fn from_env_defaults_service_secret_to_empty_pending_resolution() {
        // SAFETY: test-only env var scoping; no other test in this
        // process reads MAILENGINE_SERVICE_SECRET concurrently.
        unsafe {
            std::env::remove_var("MAILENGINE_SERVICE_SECRET");
        }
        let config = EngineConfig::from_env().unwrap();
        assert!(config.service_secret.is_empty());
    }

    #[test]
    fn generate_secret_produces_distinct_64_char_hex_strings() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
