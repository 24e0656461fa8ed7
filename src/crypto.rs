//! Credential encryption at rest (I5). The secret fields inside
//! [`crate::account::Credentials`] are AES-256-GCM sealed with a key
//! derived from the configured encryption secret; accounts stored
//! before an encryption secret was configured keep `plaintext: true`
//! until `mailengine encrypt` rewraps them.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption secret not configured")]
    NoSecret,

    #[error("credential ciphertext is malformed")]
    Malformed,

    #[error("decryption failed, wrong key or corrupted ciphertext")]
    Open,
}

/// Wraps a single [`Aes256Gcm`] key derived from the operator-supplied
/// encryption secret via SHA-256 (the secret may be any length; the
/// cipher needs exactly 32 bytes).
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(secret: &str) -> Self {
        let key_bytes = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext`, returning `hex(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> CryptoResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Open)?;
        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Reverses [`SecretCipher::encrypt`].
    pub fn decrypt(&self, sealed_hex: &str) -> CryptoResult<String> {
        let sealed = hex::decode(sealed_hex).map_err(|_| CryptoError::Malformed)?;
        if sealed.len() < 12 {
            return Err(CryptoError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Open)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed)
    }
}

/// Encrypts `secret` in place and clears the `plaintext` flag, unless
/// it is already encrypted (I5: idempotent on an already-sealed
/// account).
pub fn protect(cipher: &SecretCipher, secret: &mut String, plaintext: &mut bool) -> CryptoResult<()> {
    if !*plaintext {
        return Ok(());
    }
    *secret = cipher.encrypt(secret)?;
    *plaintext = false;
    Ok(())
}

/// Decrypts `secret`, passing it through unchanged if it is still
/// flagged plaintext (e.g. no encryption secret was ever configured).
pub fn reveal(cipher: Option<&SecretCipher>, secret: &str, plaintext: bool) -> CryptoResult<String> {
    if plaintext {
        return Ok(secret.to_string());
    }
    let cipher = cipher.ok_or(CryptoError::NoSecret)?;
    cipher.decrypt(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let cipher = SecretCipher::new("correct horse battery staple");
        let sealed = cipher.encrypt("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn decrypt_with_wrong_secret_fails() {
        let a = SecretCipher::new("secret-a");
        let b = SecretCipher::new("secret-b");
        let sealed = a.encrypt("hunter2").unwrap();
        assert!(b.decrypt(&sealed).is_err());
    }

    #[test]
    fn protect_is_idempotent_once_sealed() {
        let cipher = SecretCipher::new("s");
        let mut secret = "hunter2".to_string();
        let mut plaintext = true;
        protect(&cipher, &mut secret, &mut plaintext).unwrap();
        assert!(!plaintext);
        let sealed_once = secret.clone();
        protect(&cipher, &mut secret, &mut plaintext).unwrap();
        assert_eq!(secret, sealed_once);
    }

    #[test]
    fn reveal_passes_through_plaintext_without_a_cipher() {
        assert_eq!(reveal(None, "hunter2", true).unwrap(), "hunter2");
        assert!(reveal(None, "deadbeef", false).is_err());
    }
}
