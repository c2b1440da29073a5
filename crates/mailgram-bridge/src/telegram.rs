//! Telegram front end — bot integration via `teloxide`.
//!
//! Features:
//! - Long polling (no webhook/public IP needed)
//! - One forum topic per mail conversation (when the chat is a forum)
//! - Text, photo, document, audio, video and voice uploads become attachments
//! - Album fragments keep their `media_group_id` for reassembly
//! - Only the owner chat (and optionally listed users) is served
//! - Commands: /start, /help (answered here); /full is left to the bridge

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, FileId, InputFile, MessageId, ParseMode, ThreadId as TopicId, UpdateKind,
};
use teloxide::{ApiError, RequestError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use mailgram_core::bus::{InboundMessage, MessageBus};
use mailgram_core::config::schema::TelegramConfig;
use mailgram_core::utils::safe_filename;
use mailgram_core::{Attachment, ThreadId};

use crate::formatting::html_to_plain;
use crate::frontend::{ChatFrontend, SentId};

const HELP: &str = "📬 <b>Mailgram</b>\n\n\
    New mail shows up here, one topic per conversation.\n\
    • Reply to a bridged message (or write in its topic) to answer it.\n\
    • Reply /full to a bridged message to see it with its original formatting.\n\
    • Send files or an album with your text to attach them.";

// ─────────────────────────────────────────────
// TelegramFrontend
// ─────────────────────────────────────────────

/// Telegram bot front end using long polling via `teloxide`.
pub struct TelegramFrontend {
    bot: Bot,
    /// Owner chat: the only chat read from and written to.
    chat_id: ChatId,
    use_topics: bool,
    bus: Arc<MessageBus>,
    /// Allow-list of user IDs / usernames. Empty = anyone in the owner chat.
    allowed_users: Vec<String>,
    shutdown: Arc<Notify>,
}

impl TelegramFrontend {
    pub fn new(config: &TelegramConfig, token: &str, bus: Arc<MessageBus>) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id: ChatId(config.chat_id),
            use_topics: config.use_topics,
            bus,
            allowed_users: config.allowed_users.clone(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Check if an update may be served.
    ///
    /// Sender ID format: "user_id|username"; either part may match.
    fn is_allowed(&self, chat_id: i64, sender_id: &str) -> bool {
        if chat_id != self.chat_id.0 {
            return false;
        }
        if self.allowed_users.is_empty() {
            return true;
        }
        sender_id
            .split('|')
            .chain(std::iter::once(sender_id))
            .any(|part| !part.is_empty() && self.allowed_users.iter().any(|u| u == part))
    }

    /// Handle an incoming Telegram update.
    async fn handle_update(&self, update: &Update) {
        let message = match &update.kind {
            UpdateKind::Message(msg) => msg,
            _ => return,
        };
        let Some(user) = message.from.as_ref() else {
            return;
        };

        let username = user.username.as_deref().unwrap_or("");
        let sender_id = format!("{}|{username}", user.id.0);
        if !self.is_allowed(message.chat.id.0, &sender_id) {
            warn!(
                sender = %sender_id,
                chat = message.chat.id.0,
                "telegram message from unauthorized chat or user, ignoring"
            );
            return;
        }

        let thread = if message.is_topic_message {
            message.thread_id.map(|t| t.0 .0)
        } else {
            None
        };
        let text = message
            .text()
            .or_else(|| message.caption())
            .unwrap_or("")
            .to_string();

        if let Some(reply) = local_command(&text) {
            if let Err(e) = self.notify_html(thread, reply).await {
                warn!(error = %e, "failed to answer command");
            }
            return;
        }

        let mut inbound = InboundMessage::new(message.chat.id.0, sender_id, message.id.0, text);
        inbound.thread_id = thread;
        inbound.media_group_id = message.media_group_id().map(|g| g.to_string());
        if let Some(quoted) = message.reply_to_message() {
            let quoted_text = quoted.text().or_else(|| quoted.caption()).unwrap_or("");
            inbound = inbound.with_reply_to(quoted.id.0, quoted_text);
        }

        if let Some((file_id, filename, mime)) = file_of(message) {
            match self.download_file(&file_id).await {
                Ok(data) => inbound = inbound.with_attachment(Attachment::new(filename, mime, data)),
                Err(e) => {
                    warn!(error = %e, file = %filename, "failed to download telegram file");
                    let notice = format!("❌ Could not download {filename}; nothing was sent.");
                    if let Err(e) = self.notify(thread, &notice).await {
                        warn!(error = %e, "failed to notify user");
                    }
                    return;
                }
            }
        }

        if inbound.text.trim().is_empty()
            && inbound.attachments.is_empty()
            && inbound.media_group_id.is_none()
        {
            debug!("empty telegram update, ignoring");
            return;
        }

        debug!(
            message_id = inbound.message_id,
            thread = ?inbound.thread_id,
            attachments = inbound.attachments.len(),
            "telegram inbound message"
        );
        if let Err(e) = self.bus.publish_inbound(inbound).await {
            error!(error = %e, "failed to publish telegram message to bus");
        }
    }

    /// Download a file from Telegram into memory.
    async fn download_file(&self, file_id: &FileId) -> anyhow::Result<Vec<u8>> {
        let file = self.bot.get_file(file_id.clone()).send().await?;

        let mut data = Vec::new();
        let mut stream = self.bot.download_file_stream(&file.path);
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        debug!(bytes = data.len(), "downloaded telegram file");
        Ok(data)
    }

    async fn notify_html(&self, thread: Option<ThreadId>, html: &str) -> anyhow::Result<()> {
        let mut req = self
            .bot
            .send_message(self.chat_id, html)
            .parse_mode(ParseMode::Html);
        if let Some(t) = thread {
            req = req.message_thread_id(topic(t));
        }
        req.await?;
        Ok(())
    }
}

/// Telegram refused the HTML entities; other failures (network, rate limit)
/// must not trigger a second send.
fn is_markup_rejection(error: &RequestError) -> bool {
    match error {
        RequestError::Api(ApiError::CantParseEntities(_)) => true,
        RequestError::Api(ApiError::Unknown(message)) => message.contains("can't parse entities"),
        _ => false,
    }
}

fn topic(thread: ThreadId) -> TopicId {
    TopicId(MessageId(thread))
}

/// Reply for commands the front end answers itself.
fn local_command(text: &str) -> Option<&'static str> {
    let first = text.split_whitespace().next()?;
    match first.split('@').next()? {
        "/start" | "/help" => Some(HELP),
        _ => None,
    }
}

/// The downloadable file in a message: id, file name, MIME type.
fn file_of(message: &Message) -> Option<(FileId, String, String)> {
    let id = message.id.0;
    let mime = |m: Option<String>, fallback: &str| m.unwrap_or_else(|| fallback.to_string());

    if let Some(doc) = message.document() {
        let name = doc.file_name.clone().unwrap_or_else(|| format!("file_{id}"));
        let mime = mime(doc.mime_type.as_ref().map(|m| m.to_string()), "application/octet-stream");
        return Some((doc.file.id.clone(), safe_filename(&name), mime));
    }
    if let Some(largest) = message.photo().and_then(|sizes| sizes.last()) {
        return Some((largest.file.id.clone(), format!("photo_{id}.jpg"), "image/jpeg".into()));
    }
    if let Some(video) = message.video() {
        let name = video.file_name.clone().unwrap_or_else(|| format!("video_{id}.mp4"));
        let mime = mime(video.mime_type.as_ref().map(|m| m.to_string()), "video/mp4");
        return Some((video.file.id.clone(), safe_filename(&name), mime));
    }
    if let Some(audio) = message.audio() {
        let name = audio.file_name.clone().unwrap_or_else(|| format!("audio_{id}.mp3"));
        let mime = mime(audio.mime_type.as_ref().map(|m| m.to_string()), "audio/mpeg");
        return Some((audio.file.id.clone(), safe_filename(&name), mime));
    }
    if let Some(voice) = message.voice() {
        let mime = mime(voice.mime_type.as_ref().map(|m| m.to_string()), "audio/ogg");
        return Some((voice.file.id.clone(), format!("voice_{id}.ogg"), mime));
    }
    None
}

#[async_trait]
impl ChatFrontend for TelegramFrontend {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> anyhow::Result<()> {
        info!(chat = self.chat_id.0, "starting telegram front end (long polling)");

        let commands = vec![
            BotCommand::new("help", "How to use the mail bridge"),
            BotCommand::new("full", "Show an email with formatting (as a reply)"),
        ];
        if let Err(e) = self.bot.set_my_commands(commands).await {
            warn!(error = %e, "failed to set bot commands menu");
        }

        let mut offset: i32 = 0;
        loop {
            tokio::select! {
                updates = self.bot.get_updates().offset(offset).timeout(30).send() => {
                    match updates {
                        Ok(updates) => {
                            for update in &updates {
                                offset = (update.id.0 as i32).wrapping_add(1);
                                self.handle_update(update).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "telegram polling error");
                            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("telegram front end shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping telegram front end");
        self.shutdown.notify_one();
        Ok(())
    }

    fn supports_threads(&self) -> bool {
        self.use_topics
    }

    async fn create_thread(&self, title: &str) -> anyhow::Result<ThreadId> {
        let forum_topic = self.bot.create_forum_topic(self.chat_id, title).await?;
        Ok(forum_topic.thread_id.0 .0)
    }

    async fn send_text(&self, thread: Option<ThreadId>, html: &str) -> anyhow::Result<SentId> {
        let mut req = self
            .bot
            .send_message(self.chat_id, html)
            .parse_mode(ParseMode::Html);
        if let Some(t) = thread {
            req = req.message_thread_id(topic(t));
        }

        match req.await {
            Ok(sent) => Ok(sent.id.0),
            Err(e) if is_markup_rejection(&e) => {
                // Resend as plain text, marker included
                debug!(error = %e, "HTML rejected, retrying as plain text");
                let mut req = self.bot.send_message(self.chat_id, html_to_plain(html));
                if let Some(t) = thread {
                    req = req.message_thread_id(topic(t));
                }
                Ok(req.await?.id.0)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn send_document(
        &self,
        thread: Option<ThreadId>,
        attachment: &Attachment,
    ) -> anyhow::Result<SentId> {
        let file = InputFile::memory(attachment.data.clone()).file_name(attachment.filename.clone());
        let mut req = self.bot.send_document(self.chat_id, file);
        if let Some(t) = thread {
            req = req.message_thread_id(topic(t));
        }
        Ok(req.await?.id.0)
    }

    async fn notify(&self, thread: Option<ThreadId>, text: &str) -> anyhow::Result<()> {
        let mut req = self.bot.send_message(self.chat_id, text);
        if let Some(t) = thread {
            req = req.message_thread_id(topic(t));
        }
        req.await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::USAGE;

    const OWNER: i64 = -1001234;

    fn frontend(allowed: &[&str]) -> TelegramFrontend {
        let config = TelegramConfig {
            token: String::new(),
            chat_id: OWNER,
            use_topics: true,
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
        };
        TelegramFrontend::new(&config, "test_token", Arc::new(MessageBus::new(8)))
    }

    #[test]
    fn test_frontend_name_and_threads() {
        let fe = frontend(&[]);
        assert_eq!(fe.name(), "telegram");
        assert!(fe.supports_threads());
    }

    #[test]
    fn test_is_allowed_owner_chat_only() {
        let fe = frontend(&[]);
        assert!(fe.is_allowed(OWNER, "1|anyone"));
        assert!(!fe.is_allowed(42, "1|anyone"));
    }

    #[test]
    fn test_is_allowed_by_id_or_username() {
        let fe = frontend(&["123456", "johndoe"]);
        assert!(fe.is_allowed(OWNER, "123456|someuser"));
        assert!(fe.is_allowed(OWNER, "999999|johndoe"));
        assert!(!fe.is_allowed(OWNER, "999999|stranger"));
        assert!(!fe.is_allowed(42, "123456|johndoe"));
    }

    #[test]
    fn test_local_commands() {
        assert_eq!(local_command("/start"), Some(HELP));
        assert_eq!(local_command("/help@MailgramBot"), Some(HELP));
        assert_eq!(local_command("/full"), None);
        assert_eq!(local_command("hello"), None);
        assert_eq!(local_command(""), None);
    }

    #[test]
    fn test_only_entity_errors_fall_back_to_plain_text() {
        assert!(is_markup_rejection(&RequestError::Api(ApiError::CantParseEntities(
            "Bad Request: can't parse entities: unclosed tag".into()
        ))));
        assert!(is_markup_rejection(&RequestError::Api(ApiError::Unknown(
            "Bad Request: can't parse entities at byte offset 12".into()
        ))));
        assert!(!is_markup_rejection(&RequestError::Api(ApiError::BotBlocked)));
        assert!(!is_markup_rejection(&RequestError::Api(ApiError::Unknown(
            "Too Many Requests: retry after 5".into()
        ))));
    }

    #[tokio::test]
    async fn test_stop_is_not_lost_while_busy() {
        let fe = frontend(&[]);
        // No one is waiting yet, as when the poll loop is handling an update
        fe.stop().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), fe.shutdown.notified())
            .await
            .expect("stop signal kept until the loop waits again");
    }

    #[test]
    fn test_help_mentions_compose_format() {
        assert!(HELP.contains("/full"));
        assert!(USAGE.contains("recipient"));
    }
}
