//! Mailgram bridge — moves mail into a chat and chat replies back into mail.
//!
//! This crate provides:
//! - **frontend**: the `ChatFrontend` trait a chat service implements
//! - **bridge**: `ConversationBridge`, the mail ↔ chat orchestration
//! - **formatting** / **render**: Telegram HTML, chunking and the UID marker
//! - **album**: debounced reassembly of multi-file uploads
//!
//! The Telegram front end is behind the `telegram` feature.

pub mod album;
pub mod bridge;
pub mod compose;
pub mod error;
pub mod formatting;
pub mod frontend;
pub mod render;
pub mod subject;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use album::AlbumAggregator;
pub use bridge::{BridgeSettings, ConversationBridge};
pub use error::{ActionError, DispatchError};
pub use frontend::ChatFrontend;

#[cfg(feature = "telegram")]
pub use telegram::TelegramFrontend;
