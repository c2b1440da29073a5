//! ChatFrontend — what the bridge needs from a chat service.
//!
//! A front end:
//! - `start()` — receive updates and publish them to the bus (long-running)
//! - `stop()` — graceful shutdown
//! - `create_thread()` — open a conversation thread (forum topic)
//! - `send_text()` / `send_document()` — deliver into the owner chat
//! - `notify()` — short plain-text status for the user

use async_trait::async_trait;
use mailgram_core::{Attachment, ThreadId};

/// Id of a message the front end sent.
pub type SentId = i32;

#[async_trait]
pub trait ChatFrontend: Send + Sync {
    /// Front-end name for logging (e.g. "telegram").
    fn name(&self) -> &str;

    /// Receive updates until `stop()` is called.
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Whether conversations get their own thread.
    fn supports_threads(&self) -> bool;

    /// Open a new thread titled `title`.
    async fn create_thread(&self, title: &str) -> anyhow::Result<ThreadId>;

    /// Send one chunk of Telegram-style HTML.
    async fn send_text(&self, thread: Option<ThreadId>, html: &str) -> anyhow::Result<SentId>;

    async fn send_document(
        &self,
        thread: Option<ThreadId>,
        attachment: &Attachment,
    ) -> anyhow::Result<SentId>;

    /// Plain-text status or error message for the user.
    async fn notify(&self, thread: Option<ThreadId>, text: &str) -> anyhow::Result<()>;
}
