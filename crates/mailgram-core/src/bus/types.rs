//! Bus event types — chat updates flowing from the front end to the bridge.

use crate::types::{Attachment, ThreadId};
use chrono::{DateTime, Utc};

/// The chat message an inbound update replies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyContext {
    /// Front-end message id of the quoted message.
    pub message_id: i32,
    /// Text of the quoted message, including any invisible marker.
    pub text: String,
}

/// One update from the chat front end.
///
/// A multi-file upload arrives as several `InboundMessage`s sharing one
/// `media_group_id`; the bridge reassembles them before interpreting.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Chat the update came from.
    pub chat_id: i64,
    /// Sender identifier within the front end.
    pub sender_id: String,
    /// Front-end message id of this update.
    pub message_id: i32,
    /// Conversation thread (forum topic) the update was posted in.
    pub thread_id: Option<ThreadId>,
    /// Text or caption.
    pub text: String,
    /// Downloaded files.
    pub attachments: Vec<Attachment>,
    /// Album grouping id, shared by the fragments of one burst.
    pub media_group_id: Option<String>,
    /// The message this update replies to, if any.
    pub reply_to: Option<ReplyContext>,
    /// When the update was received.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        chat_id: i64,
        sender_id: impl Into<String>,
        message_id: i32,
        text: impl Into<String>,
    ) -> Self {
        InboundMessage {
            chat_id,
            sender_id: sender_id.into(),
            message_id,
            thread_id: None,
            text: text.into(),
            attachments: Vec::new(),
            media_group_id: None,
            reply_to: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_reply_to(mut self, message_id: i32, text: impl Into<String>) -> Self {
        self.reply_to = Some(ReplyContext {
            message_id,
            text: text.into(),
        });
        self
    }

    pub fn with_media_group(mut self, group_id: impl Into<String>) -> Self {
        self.media_group_id = Some(group_id.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Whether the text is a slash command (e.g. `/full`).
    pub fn command(&self) -> Option<&str> {
        let first = self.text.split_whitespace().next()?;
        let cmd = first.strip_prefix('/')?;
        // "/full@MyBot" → "full"
        Some(cmd.split('@').next().unwrap_or(cmd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new(-100, "42", 7, "hello");

        assert_eq!(msg.chat_id, -100);
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.message_id, 7);
        assert!(msg.thread_id.is_none());
        assert!(msg.attachments.is_empty());
        assert!(msg.reply_to.is_none());
    }

    #[test]
    fn test_builders() {
        let msg = InboundMessage::new(1, "u", 2, "caption")
            .with_thread(55)
            .with_reply_to(3, "quoted")
            .with_media_group("grp-1")
            .with_attachment(Attachment::new("a.png", "image/png", vec![1]));

        assert_eq!(msg.thread_id, Some(55));
        assert_eq!(msg.reply_to.as_ref().unwrap().message_id, 3);
        assert_eq!(msg.media_group_id.as_deref(), Some("grp-1"));
        assert_eq!(msg.attachments.len(), 1);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(InboundMessage::new(1, "u", 1, "/full").command(), Some("full"));
        assert_eq!(
            InboundMessage::new(1, "u", 1, "/full@MailgramBot please").command(),
            Some("full")
        );
        assert_eq!(InboundMessage::new(1, "u", 1, "full").command(), None);
        assert_eq!(InboundMessage::new(1, "u", 1, "").command(), None);
    }
}
