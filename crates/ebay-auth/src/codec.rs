//! AES-256-GCM codec for refresh tokens at rest
//!
//! Applied at the credential store boundary: encode before a record is
//! written, decode after it is read. Stored form is
//! `base64(nonce || ciphertext)` with a fresh 96-bit nonce per value.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;

use crate::error::{Error, Result};

/// Key size in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts refresh tokens with a fixed master key.
#[derive(Clone)]
pub struct TokenCodec {
    key: Secret<Vec<u8>>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").field("key", &self.key).finish()
    }
}

impl TokenCodec {
    /// Build a codec from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key = STANDARD
            .decode(key_base64.trim())
            .map_err(|e| Error::Crypto(format!("encryption key is not valid base64: {e}")))?;
        Self::from_bytes(key)
    }

    pub fn from_bytes(key: Vec<u8>) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::Crypto(format!(
                "encryption key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            key: Secret::new(key),
        })
    }

    pub fn encode(&self, plaintext: &str) -> Result<String> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt a stored value. Wrong key, truncation or tampering is an error,
    /// never a garbage plaintext.
    pub fn decode(&self, stored: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(stored)
            .map_err(|e| Error::Crypto(format!("stored token is not valid base64: {e}")))?;
        if bytes.len() <= NONCE_SIZE {
            return Err(Error::Crypto("stored token is truncated".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed (wrong key or corrupted data)".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("decrypted token is not valid UTF-8".into()))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.expose())
            .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))
    }
}
