//! Credential storage with ordered fallback backends.
//!
//! `CredentialStore` holds a list of backends tried in sequence: the OS
//! keyring first, an encrypted file second. Loading returns the first value
//! found; saving stops at the first backend that accepts the write. Backend
//! failures are logged and never fatal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::blob::EncryptedBlobStore;
use crate::error::StoreError;

/// Keyring service prefix.
const SERVICE_PREFIX: &str = "mailgram";

/// Which secret is being stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    ImapPassword,
    SmtpPassword,
    TelegramToken,
    ClassifierApiKey,
}

impl CredentialKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImapPassword => "imap-password",
            Self::SmtpPassword => "smtp-password",
            Self::TelegramToken => "telegram-token",
            Self::ClassifierApiKey => "classifier-api-key",
        }
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A place secrets can be kept.
pub trait CredentialBackend: Send + Sync {
    /// Short name for logs and `status` output (e.g. "keyring").
    fn name(&self) -> &'static str;

    fn load(&self, account: &str, key: CredentialKey) -> Result<Option<String>, StoreError>;

    fn save(&self, account: &str, key: CredentialKey, value: &str) -> Result<(), StoreError>;

    fn delete(&self, account: &str, key: CredentialKey) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────
// Keyring backend
// ─────────────────────────────────────────────

/// OS secret service via the `keyring` crate.
#[derive(Default)]
pub struct KeyringBackend;

impl KeyringBackend {
    fn entry(account: &str, key: CredentialKey) -> Result<keyring::Entry, StoreError> {
        let service = format!("{SERVICE_PREFIX}-{}", key.as_str());
        keyring::Entry::new(&service, account).map_err(keyring_err)
    }
}

fn keyring_err(e: keyring::Error) -> StoreError {
    StoreError::Backend {
        backend: "keyring",
        reason: e.to_string(),
    }
}

impl CredentialBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn load(&self, account: &str, key: CredentialKey) -> Result<Option<String>, StoreError> {
        match Self::entry(account, key)?.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_err(e)),
        }
    }

    fn save(&self, account: &str, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        Self::entry(account, key)?
            .set_password(value)
            .map_err(keyring_err)
    }

    fn delete(&self, account: &str, key: CredentialKey) -> Result<(), StoreError> {
        match Self::entry(account, key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_err(e)),
        }
    }
}

// ─────────────────────────────────────────────
// Encrypted file backend
// ─────────────────────────────────────────────

/// All secrets of one account in a single encrypted blob.
pub struct EncryptedFileBackend {
    path: PathBuf,
    /// Serializes read-modify-write of the blob.
    lock: Mutex<()>,
}

impl EncryptedFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn blob(&self, account: &str) -> EncryptedBlobStore {
        EncryptedBlobStore::new(&self.path, account)
    }

    fn read_all(&self, account: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.blob(account).load()?.unwrap_or_default())
    }
}

impl CredentialBackend for EncryptedFileBackend {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn load(&self, account: &str, key: CredentialKey) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all(account)?.remove(key.as_str()))
    }

    fn save(&self, account: &str, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all(account)?;
        all.insert(key.as_str().to_string(), value.to_string());
        self.blob(account).save(&all)
    }

    fn delete(&self, account: &str, key: CredentialKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all(account)?;
        if all.remove(key.as_str()).is_some() {
            self.blob(account).save(&all)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// CredentialStore
// ─────────────────────────────────────────────

/// Ordered list of backends for one account.
pub struct CredentialStore {
    account: String,
    backends: Vec<Box<dyn CredentialBackend>>,
}

impl CredentialStore {
    pub fn new(account: impl Into<String>, backends: Vec<Box<dyn CredentialBackend>>) -> Self {
        Self {
            account: account.into(),
            backends,
        }
    }

    /// Keyring first, then the encrypted file at `fallback_path`.
    pub fn with_default_backends(account: impl Into<String>, fallback_path: PathBuf) -> Self {
        Self::new(
            account,
            vec![
                Box::new(KeyringBackend),
                Box::new(EncryptedFileBackend::new(fallback_path)),
            ],
        )
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// First value found, walking the backends in order.
    pub fn load(&self, key: CredentialKey) -> Option<String> {
        self.load_with_source(key).map(|(value, _)| value)
    }

    /// Like `load`, also naming the backend that held the value.
    pub fn load_with_source(&self, key: CredentialKey) -> Option<(String, &'static str)> {
        for backend in &self.backends {
            match backend.load(&self.account, key) {
                Ok(Some(value)) => {
                    debug!(key = %key, backend = backend.name(), "credential loaded");
                    return Some((value, backend.name()));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, backend = backend.name(), error = %e, "credential backend failed to load");
                }
            }
        }
        None
    }

    /// Store in the first backend that accepts the write.
    ///
    /// Returns the backend name, or `None` if every backend failed (the
    /// credential is then simply not remembered).
    pub fn save(&self, key: CredentialKey, value: &str) -> Option<&'static str> {
        for backend in &self.backends {
            match backend.save(&self.account, key, value) {
                Ok(()) => {
                    debug!(key = %key, backend = backend.name(), "credential stored");
                    return Some(backend.name());
                }
                Err(e) => {
                    warn!(key = %key, backend = backend.name(), error = %e, "credential backend failed to store");
                }
            }
        }
        warn!(key = %key, "credential not remembered: no backend accepted it");
        None
    }

    /// Remove from every backend.
    pub fn delete(&self, key: CredentialKey) {
        for backend in &self.backends {
            if let Err(e) = backend.delete(&self.account, key) {
                warn!(key = %key, backend = backend.name(), error = %e, "credential backend failed to delete");
            }
        }
    }

    /// A configured value wins; otherwise look the key up.
    pub fn resolve(&self, configured: &str, key: CredentialKey) -> Option<String> {
        if !configured.is_empty() {
            return Some(configured.to_string());
        }
        self.load(key)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
