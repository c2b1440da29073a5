//! Persistence errors shared by the on-disk stores.

use thiserror::Error;

/// Failure while reading or writing durable state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("corrupt data in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("{backend} backend error: {reason}")]
    Backend { backend: &'static str, reason: String },
}
