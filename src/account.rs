//! Account data model (spec 3: Data Model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-registered mail account the engine keeps in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub credentials: Credentials,
    pub state: AccountState,
    pub last_error: Option<AccountError>,
    pub meta: AccountMeta,
}

impl Account {
    pub fn new(id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            id: id.into(),
            credentials,
            state: AccountState::Init,
            last_error: None,
            meta: AccountMeta::default(),
        }
    }
}

/// Either a direct IMAP+SMTP credential set, or an OAuth2-backed one
/// (spec 3: "Account > credentials").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Credentials {
    ImapSmtp {
        host: String,
        port: u16,
        tls: bool,
        user: String,
        /// Encrypted, or plaintext with `plaintext=true` (I5).
        secret: String,
        plaintext: bool,
    },
    OAuth2 {
        provider_id: String,
        refresh_token: String,
        plaintext: bool,
        access_token: Option<String>,
        access_token_expires_at: Option<DateTime<Utc>>,
    },
    /// Credentials removed by `delete` (spec 4.2: "tombstones
    /// credentials first so an in-flight worker sees auth gone").
    Tombstoned,
}

/// Connection-affecting fields the registry compares to decide whether
/// an `update` should publish a control-channel message (spec 4.2).
impl Credentials {
    fn connection_fingerprint(&self) -> (&'static str, String) {
        match self {
            Credentials::ImapSmtp { host, port, user, .. } => {
                ("imap+smtp", format!("{host}:{port}:{user}"))
            }
            Credentials::OAuth2 { provider_id, .. } => ("oauth2", provider_id.clone()),
            Credentials::Tombstoned => ("tombstoned", String::new()),
        }
    }

    /// `true` if the secret field(s) are stored unencrypted (I5).
    pub fn is_plaintext(&self) -> bool {
        match self {
            Credentials::ImapSmtp { plaintext, .. } => *plaintext,
            Credentials::OAuth2 { plaintext, .. } => *plaintext,
            Credentials::Tombstoned => false,
        }
    }

    /// Seals the secret field with `cipher`, clearing the plaintext
    /// flag (I5). No-op if already sealed.
    pub fn protect(&mut self, cipher: &crate::crypto::SecretCipher) -> crate::crypto::CryptoResult<()> {
        match self {
            Credentials::ImapSmtp { secret, plaintext, .. } => crate::crypto::protect(cipher, secret, plaintext),
            Credentials::OAuth2 { refresh_token, plaintext, .. } => {
                crate::crypto::protect(cipher, refresh_token, plaintext)
            }
            Credentials::Tombstoned => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountState {
    Init,
    Connecting,
    Syncing,
    Connected,
    AuthenticationError,
    ConnectError,
    Unset,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountError {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AccountError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMeta {
    pub name: Option<String>,
    pub email: Option<String>,
    /// I4: an account never emits `messageNew` for messages received
    /// before this timestamp.
    pub notify_from: DateTime<Utc>,
    pub copy_on_send: bool,
    pub log_enabled: bool,
}

impl Default for AccountMeta {
    fn default() -> Self {
        Self {
            name: None,
            email: None,
            notify_from: Utc::now(),
            copy_on_send: false,
            log_enabled: false,
        }
    }
}

/// A partial update to an account record (spec 4.2: `update(id, patch)`).
/// Fields the owning worker is allowed to write (`state`, `last_error`,
/// cached OAuth access token) are separate from fields the registry API
/// governs, enforced by which constructor the caller uses.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub credentials: Option<Credentials>,
    pub state: Option<AccountState>,
    pub last_error: Option<Option<AccountError>>,
    pub meta: Option<AccountMeta>,
    pub access_token: Option<(String, DateTime<Utc>)>,
}

impl AccountPatch {
    /// Applies the patch to `account`, returning whether a
    /// connection-affecting field changed (spec 4.2: "if
    /// connection-affecting fields changed, publishes `{cmd: update}`").
    pub fn apply(self, account: &mut Account) -> bool {
        let before = account.credentials.connection_fingerprint();

        if let Some(credentials) = self.credentials {
            account.credentials = credentials;
        }
        if let Some((token, expires_at)) = self.access_token
            && let Credentials::OAuth2 {
                access_token,
                access_token_expires_at,
                ..
            } = &mut account.credentials
        {
            *access_token = Some(token);
            *access_token_expires_at = Some(expires_at);
        }
        if let Some(state) = self.state {
            account.state = state;
        }
        if let Some(last_error) = self.last_error {
            account.last_error = last_error;
        }
        if let Some(meta) = self.meta {
            account.meta = meta;
        }

        let after = account.credentials.connection_fingerprint();
        before != after
    }

    /// A worker-originated patch: only `state`, `last_error`, and the
    /// cached OAuth access token may be set this way (spec 4.2
    /// invariant).
    pub fn worker_state(state: AccountState, last_error: Option<AccountError>) -> Self {
        Self {
            state: Some(state),
            last_error: Some(last_error),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_reports_connection_change_only_on_credential_fingerprint_shift() {
        let mut account = Account::new(
            "a1",
            Credentials::ImapSmtp {
                host: "imap.example.com".into(),
                port: 993,
                tls: true,
                user: "a@example.com".into(),
                secret: "enc".into(),
                plaintext: false,
            },
        );

        let changed = AccountPatch {
            meta: Some(AccountMeta {
                name: Some("Renamed".into()),
                ..account.meta.clone()
            }),
            ..Default::default()
        }
        .apply(&mut account);
        assert!(!changed);

        let changed = AccountPatch {
            credentials: Some(Credentials::ImapSmtp {
                host: "imap2.example.com".into(),
                port: 993,
                tls: true,
                user: "a@example.com".into(),
                secret: "enc".into(),
                plaintext: false,
            }),
            ..Default::default()
        }
        .apply(&mut account);
        assert!(changed);
    }

    #[test]
    fn worker_state_patch_only_touches_state_and_error() {
        let patch = AccountPatch::worker_state(
            AccountState::ConnectError,
            Some(AccountError::new("ETIMEDOUT", "connect timed out")),
        );
        assert!(patch.credentials.is_none());
        assert!(patch.meta.is_none());
        assert!(patch.state.is_some());
    }
}
