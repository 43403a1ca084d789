//! Decryption of stored portal secrets.
//!
//! `external_credentials.password_encrypted` holds either a sealed value
//! (`enc:v1:` followed by base64 of `nonce || ciphertext`, AES-256-GCM) or,
//! for rows written before sealing was introduced, the raw secret. Unsealed
//! values pass through [`CredentialCipher::reveal`] unchanged.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng;

use crate::error::CoreError;

/// Marker prefix of a sealed secret.
pub const SEALED_PREFIX: &str = "enc:v1:";

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Opens (and, for tooling and tests, seals) stored credential secrets.
#[derive(Clone, Default)]
pub struct CredentialCipher {
    cipher: Option<Aes256Gcm>,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("key_configured", &self.cipher.is_some())
            .finish()
    }
}

impl CredentialCipher {
    /// A cipher with no key: unsealed values pass through, sealed ones fail.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64_key(key: &str) -> Result<Self, CoreError> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| CoreError::Validation(format!("Credential key is not base64: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(CoreError::Validation(format!(
                "Credential key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|e| CoreError::Internal(format!("Invalid AES key: {e}")))?;
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    /// Whether a key is configured.
    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Return the plaintext secret for a stored value.
    pub fn reveal(&self, stored: &str) -> Result<String, CoreError> {
        let Some(encoded) = stored.strip_prefix(SEALED_PREFIX) else {
            return Ok(stored.to_string());
        };
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            CoreError::Decryption("secret is sealed but no credential key is configured".into())
        })?;

        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Decryption(format!("sealed secret is not base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(CoreError::Decryption("sealed secret is truncated".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Decryption("authentication tag mismatch".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Decryption("secret is not valid UTF-8".into()))
    }

    /// Seal `plaintext` with a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, CoreError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| CoreError::Validation("no credential key is configured".into()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CoreError::Internal("encryption failed".into()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(raw)))
    }
}
