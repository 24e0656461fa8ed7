//! Account Registry (spec 4.2: C3). Durable account catalog backed by
//! C1, publishing membership changes to the supervisor's control
//! channel.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::account::{Account, AccountPatch};
use crate::crypto::SecretCipher;
use crate::supervisor::{ControlMessage, Supervisor};
use mailengine_kv::KvStore;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Kv(#[from] mailengine_kv::KvError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(String),

    #[error("account not found: {0}")]
    NotFound(String),
}

fn account_key(id: &str) -> String {
    format!("iad:{id}")
}

fn log_ring_key(id: &str) -> String {
    format!("iah:{id}")
}

fn queued_messages_key(id: &str) -> String {
    format!("iaq:{id}")
}

/// Durable account catalog (spec 4.2).
pub struct AccountRegistry {
    kv: Arc<KvStore>,
    supervisor: Arc<Supervisor>,
    cipher: Option<SecretCipher>,
}

impl AccountRegistry {
    pub fn new(kv: Arc<KvStore>, supervisor: Arc<Supervisor>) -> Self {
        Self { kv, supervisor, cipher: None }
    }

    /// Same as [`AccountRegistry::new`], but seals credential secrets
    /// on `create`/`update` with the given encryption secret (I5).
    pub fn with_encryption(kv: Arc<KvStore>, supervisor: Arc<Supervisor>, encryption_secret: &str) -> Self {
        Self {
            kv,
            supervisor,
            cipher: Some(SecretCipher::new(encryption_secret)),
        }
    }

    /// Spec 4.2: "writes the record; adds `id` to the accounts set;
    /// publishes `{cmd: new, account}`; idempotent on same-id updates."
    pub async fn create(&self, mut account: Account) -> RegistryResult<()> {
        self.protect(&mut account.credentials);
        self.save(&account).await?;
        self.kv.sadd("accounts", &[account.id.clone()]).await?;
        info!(account = %account.id, "account created");
        self.supervisor.broadcast(ControlMessage::New { account });
        Ok(())
    }

    fn protect(&self, credentials: &mut crate::account::Credentials) {
        if let Some(cipher) = &self.cipher
            && let Err(e) = credentials.protect(cipher)
        {
            tracing::warn!(error = %e, "failed to seal credential secret");
        }
    }

    /// Re-encrypts every account currently flagged `plaintext` (spec 6:
    /// `mailengine encrypt`). Returns the number of accounts rewrapped.
    pub async fn rewrap_all(&self) -> RegistryResult<usize> {
        let Some(cipher) = &self.cipher else {
            return Ok(0);
        };
        let ids: Vec<String> = self.kv.smembers("accounts").await?;
        let mut rewrapped = 0;
        for id in ids {
            let Some(mut account) = self.load(&id).await? else {
                continue;
            };
            if account.credentials.is_plaintext() {
                if let Err(e) = account.credentials.protect(cipher) {
                    tracing::warn!(account = %id, error = %e, "failed to rewrap credential secret");
                    continue;
                }
                self.save(&account).await?;
                rewrapped += 1;
            }
        }
        Ok(rewrapped)
    }

    pub async fn load(&self, id: &str) -> RegistryResult<Option<Account>> {
        let json: Option<String> = self.kv.get_value(&account_key(id)).await?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Spec 4.2: "merges; if connection-affecting fields changed,
    /// publishes `{cmd: update, account}`."
    pub async fn update(&self, id: &str, patch: AccountPatch) -> RegistryResult<Account> {
        let mut account = self
            .load(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let connection_affecting = patch.apply(&mut account);
        self.protect(&mut account.credentials);
        self.save(&account).await?;
        if connection_affecting {
            self.supervisor.broadcast(ControlMessage::Update {
                account: account.clone(),
            });
        } else {
            self.supervisor.broadcast(ControlMessage::Change {
                account_id: account.id.clone(),
                kind: "meta".to_string(),
            });
        }
        Ok(account)
    }

    /// Spec 4.2: "tombstones credentials first ... removes from
    /// accounts set, publishes `{cmd: delete, account}`, drops all
    /// per-account hashes and log rings." Idempotent: a second call on
    /// an already-deleted account is a no-op.
    pub async fn delete(&self, id: &str) -> RegistryResult<()> {
        let Some(mut account) = self.load(id).await? else {
            return Ok(());
        };

        account.credentials = crate::account::Credentials::Tombstoned;
        self.save(&account).await?;

        self.kv.srem("accounts", id.to_string()).await?;
        self.kv.delete(&account_key(id)).await?;
        self.kv.delete(&log_ring_key(id)).await?;
        self.kv.delete(&queued_messages_key(id)).await?;

        info!(account = %id, "account deleted");
        self.supervisor.broadcast(ControlMessage::Delete {
            account_id: id.to_string(),
        });
        Ok(())
    }

    /// Spec 4.2: `list(stateFilter?, page, pageSize) → {accounts, pages, page}`.
    pub async fn list(
        &self,
        state_filter: Option<crate::account::AccountState>,
        page: u32,
        page_size: u32,
    ) -> RegistryResult<AccountPage> {
        let ids: Vec<String> = self.kv.smembers("accounts").await?;
        let mut accounts = Vec::new();
        for id in &ids {
            if let Some(account) = self.load(id).await? {
                match state_filter {
                    Some(state) if account.state != state => continue,
                    _ => accounts.push(account),
                }
            }
        }
        accounts.sort_by(|a, b| a.id.cmp(&b.id));

        let page_size = page_size.max(1);
        let pages = accounts.len().div_ceil(page_size as usize).max(1) as u32;
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let page_accounts = accounts
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(AccountPage {
            accounts: page_accounts,
            pages,
            page,
        })
    }

    /// Appends a MessagePack-encoded entry to the per-account log ring,
    /// bounded at `max_log_lines` (spec 3: "Per-account Log Ring").
    pub async fn append_log(
        &self,
        id: &str,
        entry: &impl serde::Serialize,
        max_log_lines: u64,
    ) -> RegistryResult<()> {
        let bytes = rmp_serde::to_vec(entry).map_err(|e| RegistryError::MsgPackEncode(e.to_string()))?;
        self.kv.lpush(&log_ring_key(id), &[bytes]).await?;
        if max_log_lines > 0 {
            self.kv
                .ltrim(&log_ring_key(id), 0, max_log_lines as isize - 1)
                .await?;
        }
        Ok(())
    }

    async fn save(&self, account: &Account) -> RegistryResult<()> {
        let json = serde_json::to_string(account)?;
        self.kv.set_value(&account_key(&account.id), json).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AccountPage {
    pub accounts: Vec<Account>,
    pub pages: u32,
    pub page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountMeta, AccountState, Credentials};

    #[test]
    fn account_key_layout_matches_spec_6() {
        assert_eq!(account_key("a1"), "iad:a1");
        assert_eq!(log_ring_key("a1"), "iah:a1");
        assert_eq!(queued_messages_key("a1"), "iaq:a1");
    }

    #[test]
    fn account_serializes_round_trip() {
        let account = Account {
            id: "a1".to_string(),
            credentials: Credentials::ImapSmtp {
                host: "imap.example.com".into(),
                port: 993,
                tls: true,
                user: "a@example.com".into(),
                secret: "enc".into(),
                plaintext: false,
            },
            state: AccountState::Init,
            last_error: None,
            meta: AccountMeta::default(),
        };
        let json = serde_json::to_string(&account).unwrap();
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, account.id);
    }
}
