//! Field-level encryption for credential material
//!
//! XChaCha20-Poly1305 under a key derived from the configured secret. Every
//! field gets its own random nonce and is bound to its field name as
//! associated data, so ciphertexts cannot be swapped between columns.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::errors::EngineError;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Seals and opens individual secret fields
pub struct VaultCipher {
    cipher: XChaCha20Poly1305,
}

impl VaultCipher {
    /// Derive the cipher key from the configured secret
    pub fn from_secret(secret: &SecretString) -> Self {
        let digest = Sha256::digest(secret.expose_secret().as_bytes());
        let cipher = XChaCha20Poly1305::new(Key::from_slice(digest.as_slice()));
        Self { cipher }
    }

    /// Encrypt `plaintext` for column `field`, as base64(nonce || ciphertext)
    pub fn seal(&self, field: &str, plaintext: &str) -> Result<String, EngineError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: field.as_bytes(),
                },
            )
            .map_err(|_| EngineError::CryptoError(format!("failed to encrypt {}", field)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a value produced by [`VaultCipher::seal`] for the same field
    pub fn open(&self, field: &str, sealed: &str) -> Result<SecretString, EngineError> {
        let raw = BASE64
            .decode(sealed.trim())
            .map_err(|e| EngineError::CryptoError(format!("{} is not valid base64: {}", field, e)))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(EngineError::CryptoError(format!("{} ciphertext is truncated", field)));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: field.as_bytes(),
                },
            )
            .map_err(|_| {
                EngineError::CryptoError(format!(
                    "failed to decrypt {} (wrong key or tampered value)",
                    field
                ))
            })?;

        let text = String::from_utf8(plaintext)
            .map_err(|_| EngineError::CryptoError(format!("{} is not valid UTF-8", field)))?;
        Ok(SecretString::from(text))
    }
}

/// Fresh random key suitable for `SHIPYARD_VAULT_KEY`
pub fn generate_key_b64() -> String {
    let key = XChaCha20Poly1305::generate_key(&mut OsRng);
    BASE64.encode(key)
}
