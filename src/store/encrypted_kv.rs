//! File-backed encrypted key/value store (spec §6 "Encrypted KV").
//!
//! Values are JSON-serialized then sealed with ChaCha20-Poly1305 AEAD;
//! the 32-byte key is derived deterministically from the configured
//! passphrase via SHA-256(passphrase || salt), salt fixed per spec's
//! "salt may be fixed" option. Files live at
//! `<data_dir>/<first-2-chars-of-key>/<key>.enc`. Dependency choice
//! (`chacha20poly1305` + `sha2`) follows the `AharonR-downloader`
//! example's encrypted-secret-storage stack.

use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Fixed salt mixed into the KDF. The spec allows a fixed salt; using
/// one keeps the store reproducible across runs for the same passphrase
/// without needing a second persisted secret.
const KDF_SALT: &[u8] = b"sitemap-keyword-pipeline/kv-salt/v1";
const NONCE_LEN: usize = 12;

fn derive_key(passphrase: &str) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(KDF_SALT);
    let digest = hasher.finalize();
    *Key::from_slice(&digest)
}

/// Encrypted, file-backed key/value store over a directory tree.
pub struct EncryptedStore {
    data_dir: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl EncryptedStore {
    /// # Errors
    /// Returns [`PipelineError::Store`] if `data_dir` cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self, PipelineError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| PipelineError::Store(format!("create data dir: {e}")))?;
        let cipher = ChaCha20Poly1305::new(&derive_key(passphrase));
        Ok(Self { data_dir, cipher })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let prefix: String = key.chars().take(2).collect();
        let prefix = if prefix.is_empty() { "__".to_string() } else { prefix };
        self.data_dir.join(prefix).join(format!("{key}.enc"))
    }

    /// Serialize, encrypt, and persist `value` under `key`.
    ///
    /// # Errors
    /// Returns [`PipelineError::Store`] on serialization, encryption, or
    /// I/O failure.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PipelineError> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| PipelineError::Store(format!("serialize {key}: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| PipelineError::Store(format!("encrypt {key}")))?;

        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Store(format!("create dir for {key}: {e}")))?;
        }

        let mut on_disk = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        on_disk.extend_from_slice(&nonce_bytes);
        on_disk.extend_from_slice(&ciphertext);
        std::fs::write(&path, on_disk).map_err(|e| PipelineError::Store(format!("write {key}: {e}")))
    }

    /// Load and decrypt the value at `key`, or `None` if it doesn't exist.
    ///
    /// # Errors
    /// Returns [`PipelineError::Store`] on I/O, decryption, or
    /// deserialization failure.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PipelineError> {
        let path = self.path_for(key);
        let on_disk = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::Store(format!("read {key}: {e}"))),
        };
        if on_disk.len() < NONCE_LEN {
            return Err(PipelineError::Store(format!("{key}: truncated ciphertext")));
        }
        let (nonce_bytes, ciphertext) = on_disk.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| PipelineError::Store(format!("decrypt {key}")))?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| PipelineError::Store(format!("deserialize {key}: {e}")))?;
        Ok(Some(value))
    }

    /// Remove the value at `key`, if present.
    ///
    /// # Errors
    /// Returns [`PipelineError::Store`] on I/O failure other than "not found".
    pub fn delete(&self, key: &str) -> Result<(), PipelineError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Store(format!("delete {key}: {e}"))),
        }
    }

    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
