//! Service API tokens (spec 6: `tokens issue|export|import`). Exported
//! tokens round-trip as MessagePack, base64url-encoded, matching the
//! per-account log ring's MessagePack convention (spec 3).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use mailengine_kv::KvStore;

/// Spec 6: "scopes ⊆ `{*, api, metrics}`".
pub const VALID_SCOPES: &[&str] = &["*", "api", "metrics"];

const TOKENS_KEY: &str = "settings:tokens";

pub type TokenResult<T> = std::result::Result<T, TokenError>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Kv(#[from] mailengine_kv::KvError),

    #[error("invalid scope: {0}, expected one of {VALID_SCOPES:?}")]
    InvalidScope(String),

    #[error("malformed token data: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceToken {
    pub id: String,
    pub secret: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub fn validate_scopes(scopes: &[String]) -> TokenResult<()> {
    for scope in scopes {
        if !VALID_SCOPES.contains(&scope.as_str()) {
            return Err(TokenError::InvalidScope(scope.clone()));
        }
    }
    Ok(())
}

fn generate_token_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Durable token catalog, backed by a single KV hash keyed by token id.
pub struct TokenStore {
    kv: Arc<KvStore>,
}

impl TokenStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    pub async fn issue(&self, scopes: Vec<String>) -> TokenResult<ServiceToken> {
        validate_scopes(&scopes)?;
        let token = ServiceToken {
            id: uuid::Uuid::new_v4().to_string(),
            secret: generate_token_secret(),
            scopes,
            created_at: Utc::now(),
        };
        self.save(&token).await?;
        Ok(token)
    }

    async fn save(&self, token: &ServiceToken) -> TokenResult<()> {
        let bytes = rmp_serde::to_vec(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        self.kv.hset(TOKENS_KEY, &token.id, hex::encode(bytes)).await?;
        Ok(())
    }

    pub async fn list(&self) -> TokenResult<Vec<ServiceToken>> {
        let raw: HashMap<String, String> = self.kv.hgetall(TOKENS_KEY).await?;
        raw.values()
            .map(|encoded| {
                let bytes = hex::decode(encoded).map_err(|e| TokenError::Malformed(e.to_string()))?;
                rmp_serde::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
            })
            .collect()
    }

    /// Spec 6: "export (MessagePack, base64url)".
    pub async fn export(&self) -> TokenResult<String> {
        let tokens = self.list().await?;
        let bytes = rmp_serde::to_vec(&tokens).map_err(|e| TokenError::Malformed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Reverses [`TokenStore::export`], validating scopes on every
    /// imported token before persisting any of them.
    pub async fn import(&self, encoded: &str) -> TokenResult<usize> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let tokens: Vec<ServiceToken> =
            rmp_serde::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))?;
        for token in &tokens {
            validate_scopes(&token.scopes)?;
        }
        for token in &tokens {
            self.save(token).await?;
        }
        Ok(tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_scopes_rejects_unknown_scope() {
        assert!(validate_scopes(&["api".to_string()]).is_ok());
        assert!(validate_scopes(&["bogus".to_string()]).is_err());
    }

    #[test]
    fn export_format_round_trips_through_serde() {
        let token = ServiceToken {
            id: "t1".to_string(),
            secret: "s".to_string(),
            scopes: vec!["api".to_string()],
            created_at: Utc::now(),
        };
        let bytes = rmp_serde::to_vec(&vec![token.clone()]).unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(&bytes);
        let decoded = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let tokens: Vec<ServiceToken> = rmp_serde::from_slice(&decoded).unwrap();
        assert_eq!(tokens[0].id, token.id);
    }
}
