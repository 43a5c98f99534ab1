//! At-rest encryption for session token fields.
//!
//! Tokens persisted to the session store are encrypted with AES-256-GCM
//! under a server-managed master key. Per-record uniqueness comes from the
//! random nonce generated at encryption time; the stored form is
//! `base64(nonce || ciphertext || tag)`.
//!
//! The key is optional: when no key is configured the store falls back to
//! plaintext, which is an explicit degraded mode rather than an error.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use rand::RngCore;

use crate::error::CryptoError;

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Symmetric cipher for token fields stored at rest.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material in logs.
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Creates a cipher from key material given as base64 or hex.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` when the material does not decode
    /// to exactly 32 bytes.
    pub fn new(key_material: &str) -> Result<Self, CryptoError> {
        let bytes = decode_key_material(key_material)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey {
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Encrypts a token with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| CryptoError::Encryption {
                reason: e.to_string(),
            })?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext =
            cipher
                .encrypt(nonce, plaintext.as_bytes())
                .map_err(|e| CryptoError::Encryption {
                    reason: e.to_string(),
                })?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// Decrypts a token previously produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decryption` when the input is not valid
    /// base64, is too short, or fails authentication (wrong key, corrupted
    /// data, or a value that was never encrypted).
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })?;

        if combined.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CryptoError::Decryption {
                reason: "input too short".to_string(),
            });
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
    }
}

fn decode_key_material(key_material: &str) -> Result<Vec<u8>, CryptoError> {
    // A 64-char hex string is also valid base64, so hex takes precedence.
    if key_material.len() == 64
        && key_material.chars().all(|c| c.is_ascii_hexdigit())
        && let Some(bytes) = decode_hex(key_material)
    {
        return Ok(bytes);
    }
    base64::engine::general_purpose::STANDARD
        .decode(key_material)
        .map_err(|e| CryptoError::InvalidKey {
            reason: format!("key material is neither 64-char hex nor base64: {e}"),
        })
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).ok())
        .collect()
}
