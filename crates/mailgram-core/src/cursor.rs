//! Durable UID watermark.
//!
//! The cursor is the identifier of the most recently confirmed-dispatched
//! message. It is stored as a single newline-terminated integer and only
//! ever moves forward.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Monotonic on-disk UID cursor.
///
/// Writes go through a temp file + rename so a crash never leaves a
/// truncated value behind.
pub struct UidCursorStore {
    path: PathBuf,
    /// In-memory copy of the persisted value (`None` until first load).
    current: Mutex<Option<u32>>,
}

impl UidCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a cursor has ever been persisted.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Last persisted watermark, or zero if absent.
    ///
    /// An unreadable file is treated as zero and logged.
    pub async fn load(&self) -> u32 {
        let mut current = self.current.lock().await;
        if let Some(v) = *current {
            return v;
        }
        let v = read_cursor(&self.path).await;
        *current = Some(v);
        v
    }

    /// Persist `max(current, uid)` and return the stored value.
    ///
    /// Returns only after the value is on disk.
    pub async fn advance(&self, uid: u32) -> Result<u32, StoreError> {
        let mut current = self.current.lock().await;
        let prev = match *current {
            Some(v) => v,
            None => read_cursor(&self.path).await,
        };
        if uid <= prev && self.path.exists() {
            *current = Some(prev);
            return Ok(prev);
        }
        let next = uid.max(prev);
        write_atomic(&self.path, next).await?;
        *current = Some(next);
        debug!(uid = next, "cursor advanced");
        Ok(next)
    }

    /// Initialize the cursor on first run.
    ///
    /// Writes `uid` only when no cursor file exists yet; returns whether it did.
    pub async fn seed(&self, uid: u32) -> Result<bool, StoreError> {
        let mut current = self.current.lock().await;
        if self.path.exists() {
            return Ok(false);
        }
        write_atomic(&self.path, uid).await?;
        *current = Some(uid);
        debug!(uid, "cursor seeded");
        Ok(true)
    }
}

async fn read_cursor(path: &Path) -> u32 {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => match s.trim().parse::<u32>() {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cursor file, starting from zero");
                0
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read cursor file");
            0
        }
    }
}

async fn write_atomic(path: &Path, value: u32) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, format!("{value}\n")).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
