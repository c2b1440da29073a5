//! Transport capability traits.
//!
//! Sync logic depends only on these: `MailTransport` for the single stateful
//! inbound session and `MailSender` for outbound delivery. Concrete
//! implementations live in `imap` and `smtp`.

use std::time::Duration;

use async_trait::async_trait;
use mailgram_core::Attachment;
use tokio::sync::watch;

use crate::error::MailError;
use crate::parser::ParsedEmail;

/// Push-listening gate. `true` = listening allowed; flips to `false` when a
/// guarded operation needs the session.
pub type PushGate = watch::Receiver<bool>;

/// Resolves once the gate reads `false` (or its sender is gone).
pub(crate) async fn gate_closed(gate: &mut PushGate) {
    let _ = gate.wait_for(|open| !*open).await.map(|_| ());
}

/// Resolves once the gate reads `true`. Returns `false` if the sender is gone.
pub(crate) async fn gate_open(gate: &mut PushGate) -> bool {
    gate.wait_for(|open| *open).await.map(|_| ()).is_ok()
}

/// How a push (IDLE) wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server reported a mailbox change.
    Changed,
    /// The refresh period elapsed without a change.
    TimedOut,
    /// The gate closed; the session is wanted elsewhere.
    Interrupted,
}

/// One stateful inbound mail session.
#[async_trait]
pub trait MailTransport: Send {
    /// Dial and authenticate, replacing any previous session.
    async fn connect(&mut self) -> Result<(), MailError>;

    async fn select(&mut self, mailbox: &str) -> Result<(), MailError>;

    /// UIDs of all non-deleted messages in the selected mailbox.
    async fn search_uids(&mut self) -> Result<Vec<u32>, MailError>;

    /// Raw RFC 5322 bytes of one message, without setting `\Seen`.
    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError>;

    /// Wait for a mailbox change, the refresh period, or the gate closing.
    async fn idle(&mut self, refresh: Duration, gate: &mut PushGate)
        -> Result<IdleOutcome, MailError>;

    /// Release the session. Never fails.
    async fn close(&mut self);
}

/// Outbound mail delivery.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

// ─────────────────────────────────────────────
// Outgoing mail
// ─────────────────────────────────────────────

/// A message to hand to a `MailSender`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
    /// `In-Reply-To` header (a Message-ID with angle brackets).
    pub in_reply_to: Option<String>,
    /// `References` chain, oldest first.
    pub references: Vec<String>,
}

impl OutgoingMail {
    /// A fresh message (not a reply).
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// A reply to `original`: addressed to its Reply-To (or From), subject
    /// prefixed with a single `Re: `, threaded via In-Reply-To/References.
    pub fn reply_to(original: &ParsedEmail, body: impl Into<String>) -> Self {
        let to = original
            .reply_to
            .clone()
            .unwrap_or_else(|| original.sender.clone());

        let mut references = original.references.clone();
        let in_reply_to = if original.message_id.is_empty() {
            None
        } else {
            if !references.contains(&original.message_id) {
                references.push(original.message_id.clone());
            }
            Some(original.message_id.clone())
        };

        Self {
            to: vec![to],
            subject: build_reply_subject(&original.subject),
            body: body.into(),
            attachments: Vec::new(),
            in_reply_to,
            references,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Subject for a reply; never stacks a second `Re:`.
pub fn build_reply_subject(original_subject: &str) -> String {
    let trimmed = original_subject.trim();
    if trimmed.is_empty() {
        return "Re: (no subject)".to_string();
    }
    if trimmed.to_lowercase().starts_with("re:") {
        return trimmed.to_string();
    }
    format!("Re: {trimmed}")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
