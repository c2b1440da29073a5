//! Durable subject ↔ chat thread mapping.
//!
//! Two tables:
//! - normalized subject key → thread id (one chat thread per conversation)
//! - thread id → representative mail UID (what a reply in that thread answers)
//!
//! Entries are never deleted. Every change is written through to an
//! encrypted blob before the call returns.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blob::EncryptedBlobStore;
use crate::error::StoreError;
use crate::types::ThreadId;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    subjects: HashMap<String, ThreadId>,
    #[serde(default)]
    threads: HashMap<ThreadId, u32>,
}

/// Subject → thread map with write-through persistence.
pub struct ConversationMap {
    tables: Mutex<Tables>,
    store: Option<EncryptedBlobStore>,
}

impl ConversationMap {
    /// Load from `store`, starting empty if the blob is absent or unreadable.
    pub fn load(store: EncryptedBlobStore) -> Self {
        let tables = match store.load::<Tables>() {
            Ok(Some(t)) => {
                debug!(
                    conversations = t.subjects.len(),
                    "conversation map loaded"
                );
                t
            }
            Ok(None) => Tables::default(),
            Err(e) => {
                warn!(path = %store.path().display(), error = %e, "failed to load conversation map, starting empty");
                Tables::default()
            }
        };
        Self {
            tables: Mutex::new(tables),
            store: Some(store),
        }
    }

    /// A map that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            store: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.save(tables),
            None => Ok(()),
        }
    }

    /// Thread for a normalized subject key.
    pub fn thread_for(&self, key: &str) -> Option<ThreadId> {
        self.lock().subjects.get(key).copied()
    }

    /// Representative UID for a thread.
    pub fn representative(&self, thread_id: ThreadId) -> Option<u32> {
        self.lock().threads.get(&thread_id).copied()
    }

    /// Record a newly created thread and its first message.
    ///
    /// If the key is already mapped the existing thread is kept and returned.
    pub fn insert(&self, key: &str, thread_id: ThreadId, uid: u32) -> Result<ThreadId, StoreError> {
        let mut tables = self.lock();
        if let Some(existing) = tables.subjects.get(key) {
            return Ok(*existing);
        }
        tables.subjects.insert(key.to_string(), thread_id);
        tables.threads.insert(thread_id, uid);
        self.persist(&tables)?;
        debug!(thread_id, uid, "conversation created");
        Ok(thread_id)
    }

    /// Point a thread at a newer message.
    ///
    /// Older UIDs never replace a newer representative.
    pub fn set_representative(&self, thread_id: ThreadId, uid: u32) -> Result<(), StoreError> {
        let mut tables = self.lock();
        match tables.threads.get(&thread_id) {
            Some(current) if *current >= uid => return Ok(()),
            _ => {}
        }
        tables.threads.insert(thread_id, uid);
        self.persist(&tables)
    }

    /// Number of known conversations.
    pub fn len(&self) -> usize {
        self.lock().subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
