//! Mailgram core — shared types, configuration and durable state.
//!
//! - **config**: JSON config schema + loader with env overrides
//! - **bus**: inbound queue carrying chat updates to the bridge
//! - **cursor**: the monotonic UID watermark
//! - **blob**: AES-256-GCM encrypted key/value files
//! - **credentials**: ordered credential backends (keyring, encrypted file)
//! - **conversation**: subject ↔ chat thread mapping

pub mod blob;
pub mod bus;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod cursor;
pub mod error;
pub mod types;
pub mod utils;

pub use error::StoreError;
pub use types::{Attachment, ThreadId};
