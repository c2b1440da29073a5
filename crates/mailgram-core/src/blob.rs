//! Encrypted key/value files.
//!
//! File content is `nonce (12 bytes) ‖ AES-256-GCM ciphertext` of a JSON
//! document. The key is the SHA-256 hash of a stable, non-secret account
//! identifier, so this only protects against casual disclosure; secrets
//! should live in the OS keyring when one is available.

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::StoreError;

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

/// A single encrypted JSON document on disk.
pub struct EncryptedBlobStore {
    path: PathBuf,
    cipher: Aes256Gcm,
}

impl EncryptedBlobStore {
    /// Open (lazily) the blob at `path`, keyed by `account_id`.
    pub fn new(path: impl Into<PathBuf>, account_id: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(account_id.as_bytes()).into();
        Self {
            path: path.into(),
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt `plaintext` into `nonce ‖ ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| StoreError::Crypto(format!("encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    /// Decrypt a `nonce ‖ ciphertext` buffer.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        if data.len() < NONCE_SIZE {
            return Err(StoreError::Corrupt {
                path: self.path.display().to_string(),
                reason: format!("blob too short ({} bytes)", data.len()),
            });
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| StoreError::Crypto(format!("decryption failed: {e}")))
    }

    /// Load and decrypt the document. `Ok(None)` if the file does not exist.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let plaintext = self.open(&data)?;
        let value = serde_json::from_slice(&plaintext)?;
        Ok(Some(value))
    }

    /// Encrypt and atomically write the document.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec(value)?;
        let sealed = self.seal(&json)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &sealed)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = sealed.len(), "encrypted blob saved");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("secret.bin"), "me@example.com");

        let mut map = HashMap::new();
        map.insert("imap".to_string(), "hunter2".to_string());
        store.save(&map).unwrap();

        let loaded: HashMap<String, String> = store.load().unwrap().unwrap();
        assert_eq!(loaded.get("imap").unwrap(), "hunter2");
    }

    #[test]
    fn test_file_layout_is_nonce_then_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("secret.bin"), "acct");
        store.save(&"plain value").unwrap();

        let raw = std::fs::read(store.path()).unwrap();
        // 12-byte nonce + JSON ("\"plain value\"" = 13 bytes) + 16-byte tag
        assert_eq!(raw.len(), NONCE_SIZE + 13 + 16);
        assert!(!raw.windows(5).any(|w| w == b"plain"));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("absent.bin"), "acct");
        let loaded: Option<String> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_wrong_account_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        EncryptedBlobStore::new(&path, "alice@example.com")
            .save(&"x")
            .unwrap();

        let other = EncryptedBlobStore::new(&path, "bob@example.com");
        let err = other.load::<String>().unwrap_err();
        assert!(matches!(err, StoreError::Crypto(_)));
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedBlobStore::new(dir.path().join("short.bin"), "acct");
        std::fs::write(store.path(), [1, 2, 3]).unwrap();
        assert!(matches!(
            store.load::<String>().unwrap_err(),
            StoreError::Corrupt { .. }
        ));
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let store = EncryptedBlobStore::new("unused.bin", "acct");
        let a = store.seal(b"same").unwrap();
        let b = store.seal(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.open(&a).unwrap(), b"same");
    }
}
