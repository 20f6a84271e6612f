//! Output-password decryption for report templates.
//!
//! Encrypted passwords are `base64(nonce || ciphertext || tag)` sealed with
//! AES-256-GCM. The key file holds the base64-encoded 32-byte key and is
//! read lazily on first use.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::prelude::*;

/// Size of the AES-256 key in bytes.
const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag.
const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to read key file {}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key must be {KEY_SIZE} bytes of base64, got {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Value is not valid base64")]
    Encoding(#[from] base64::DecodeError),

    #[error("Encrypted value too short")]
    TooShort,

    #[error("Decryption failed")]
    Decrypt,

    #[error("Decrypted password is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Decrypts (and for tooling, encrypts) template output passwords.
///
/// All key loading and cipher use goes through one mutex so concurrent
/// resolutions never race on the key file.
pub struct PasswordCipher {
    key_path: PathBuf,
    cipher: Mutex<Option<Aes256Gcm>>,
}

impl PasswordCipher {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            cipher: Mutex::new(None),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Decrypt a base64 password produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, PasswordError> {
        let sealed = BASE64_STANDARD.decode(encoded.trim())?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(PasswordError::TooShort);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let mut guard = self.cipher.lock().unwrap_or_else(PoisonError::into_inner);
        let cipher = self.loaded(&mut guard)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PasswordError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }

    /// Seal a plaintext password into the base64 form `decrypt` accepts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, PasswordError> {
        let mut guard = self.cipher.lock().unwrap_or_else(PoisonError::into_inner);
        let cipher = self.loaded(&mut guard)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| PasswordError::Decrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(sealed))
    }

    fn loaded<'a>(
        &self,
        slot: &'a mut Option<Aes256Gcm>,
    ) -> Result<&'a Aes256Gcm, PasswordError> {
        if slot.is_none() {
            let contents =
                std::fs::read_to_string(&self.key_path).map_err(|source| PasswordError::KeyFile {
                    path: self.key_path.clone(),
                    source,
                })?;
            let key = BASE64_STANDARD.decode(contents.trim())?;
            if key.len() != KEY_SIZE {
                return Err(PasswordError::InvalidKeyLength(key.len()));
            }
            let cipher = Aes256Gcm::new_from_slice(&key)
                .map_err(|_| PasswordError::InvalidKeyLength(key.len()))?;
            tracing::debug!(path = %self.key_path.display(), "Loaded password key");
            *slot = Some(cipher);
        }
        slot.as_ref().ok_or(PasswordError::Decrypt)
    }
}

impl std::fmt::Debug for PasswordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCipher")
            .field("key_path", &self.key_path)
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}
