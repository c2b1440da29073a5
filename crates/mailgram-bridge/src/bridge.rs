//! ConversationBridge — mail ↔ chat orchestration.
//!
//! Outbound (mail → chat): each new message is placed in the thread for
//! its normalised subject, optionally classified, rendered, split into
//! chunks (the last one carrying the UID marker) and sent, followed by its
//! attachments.
//!
//! Inbound (chat → mail): updates from the bus are reassembled by the
//! album aggregator, then read as `/full`, a reply (marker or thread), or a
//! new mail. Every action touching the mail session runs under
//! [`SharedSession::exclusive`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use mailgram_classifier::{Classification, Classifier};
use mailgram_core::bus::{InboundMessage, MessageBus};
use mailgram_core::config::schema::Config;
use mailgram_core::conversation::ConversationMap;
use mailgram_core::utils::truncate_string;
use mailgram_core::{Attachment, ThreadId};
use mailgram_mail::{
    parse_email, ConnectionManager, MailError, MailSender, MessageSink, OutgoingMail,
    ParsedEmail, SharedSession,
};

use crate::album::{AlbumAggregator, FlushFn};
use crate::compose::{parse_compose, USAGE};
use crate::error::{ActionError, DispatchError};
use crate::formatting::{decode_marker, encode_marker, marker_len, split_html, strip_marker};
use crate::frontend::ChatFrontend;
use crate::render::{render_email, RenderMode};
use crate::subject::{normalize_subject, subject_key};

/// Telegram caps forum topic names at 128 characters.
const THREAD_TITLE_MAX: usize = 128;

/// Bridge behaviour knobs.
#[derive(Clone, Debug)]
pub struct BridgeSettings {
    /// Mailbox the UIDs refer to.
    pub mailbox: String,
    pub max_chunk_chars: usize,
    pub forward_attachments: bool,
    pub album_debounce: Duration,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mailbox: config.sync.mailbox.clone(),
            max_chunk_chars: config.bridge.max_chunk_chars.max(64),
            forward_attachments: config.bridge.forward_attachments,
            album_debounce: config.bridge.album_debounce(),
        }
    }
}

pub struct ConversationBridge {
    frontend: Arc<dyn ChatFrontend>,
    conversations: Arc<ConversationMap>,
    session: Arc<SharedSession>,
    sender: Arc<dyn MailSender>,
    classifier: Option<Arc<dyn Classifier>>,
    settings: BridgeSettings,
    /// Serialises thread lookup-or-create.
    thread_lock: Mutex<()>,
    albums: AlbumAggregator<InboundMessage>,
    shutdown: Notify,
}

impl ConversationBridge {
    pub fn new(
        frontend: Arc<dyn ChatFrontend>,
        conversations: Arc<ConversationMap>,
        session: Arc<SharedSession>,
        sender: Arc<dyn MailSender>,
        classifier: Option<Arc<dyn Classifier>>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let on_flush: FlushFn<InboundMessage> = Arc::new(
                move |group: String,
                      fragments: Vec<InboundMessage>|
                      -> Pin<Box<dyn Future<Output = ()> + Send>> {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(bridge) = weak.upgrade() {
                            debug!(group = %group, fragments = fragments.len(), "album received");
                            bridge.handle_fragments(fragments).await;
                        }
                    })
                },
            );

            Self {
                frontend,
                conversations,
                session,
                sender,
                classifier,
                albums: AlbumAggregator::new(settings.album_debounce, on_flush),
                settings,
                thread_lock: Mutex::new(()),
                shutdown: Notify::new(),
            }
        })
    }

    // ─────────────────────────────────────────
    // Outbound: mail → chat
    // ─────────────────────────────────────────

    /// Thread for `email`'s conversation, created on first use.
    async fn thread_for(
        &self,
        uid: u32,
        email: &ParsedEmail,
    ) -> Result<Option<ThreadId>, DispatchError> {
        if !self.frontend.supports_threads() {
            return Ok(None);
        }

        let key = subject_key(&email.subject);
        let _guard = self.thread_lock.lock().await;
        if let Some(thread) = self.conversations.thread_for(&key) {
            return Ok(Some(thread));
        }

        let title = truncate_string(&normalize_subject(&email.subject), THREAD_TITLE_MAX);
        let thread = self
            .frontend
            .create_thread(&title)
            .await
            .map_err(|e| DispatchError::Thread(e.to_string()))?;
        info!(thread, title = %title, "conversation thread created");

        if let Err(e) = self.conversations.insert(&key, thread, uid) {
            warn!(thread, error = %e, "failed to persist conversation thread");
        }
        Ok(Some(thread))
    }

    async fn classify(&self, email: &ParsedEmail) -> Option<Classification> {
        let classifier = self.classifier.as_ref()?;
        match classifier.classify(&email.summary_text()).await {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(
                    classifier = classifier.display_name(),
                    error = %e,
                    "classification failed, rendering plain"
                );
                None
            }
        }
    }

    /// Send rendered HTML in order (marker in the last chunk), then attachments.
    async fn deliver(
        &self,
        thread: Option<ThreadId>,
        uid: u32,
        html: &str,
        attachments: &[Attachment],
    ) -> Result<(), DispatchError> {
        let budget = self
            .settings
            .max_chunk_chars
            .saturating_sub(marker_len(uid))
            .max(1);
        let mut chunks = split_html(html, budget);
        if let Some(last) = chunks.last_mut() {
            last.push_str(&encode_marker(uid));
        }
        let files: Vec<&Attachment> = attachments.iter().filter(|a| !a.is_empty()).collect();

        let total = chunks.len() + files.len();
        let mut failures = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            if let Err(e) = self.frontend.send_text(thread, chunk).await {
                warn!(uid, chunk = i, error = %e, "chunk send failed");
                failures.push(format!("part {}: {e}", i + 1));
            }
        }
        for file in files {
            if let Err(e) = self.frontend.send_document(thread, file).await {
                warn!(uid, file = %file.filename, error = %e, "attachment send failed");
                failures.push(format!("{}: {e}", file.filename));
            }
        }

        match DispatchError::collect(total, failures) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────
    // Inbound: chat → mail
    // ─────────────────────────────────────────

    /// Consume front-end updates from `bus` until [`stop`](Self::stop).
    pub async fn run_inbound(self: Arc<Self>, bus: Arc<MessageBus>) {
        info!(frontend = self.frontend.name(), "bridge inbound loop started");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                msg = bus.consume_inbound() => match msg {
                    Some(msg) => self.handle_inbound(msg).await,
                    None => break,
                },
            }
        }
        info!(
            pending_albums = self.albums.pending(),
            "bridge inbound loop stopped"
        );
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Interpret one update, or buffer it if it is part of an album.
    pub async fn handle_inbound(&self, msg: InboundMessage) {
        if self.albums.offer(msg.media_group_id.as_deref(), &msg) {
            return;
        }
        self.handle_fragments(vec![msg]).await;
    }

    async fn handle_fragments(&self, fragments: Vec<InboundMessage>) {
        let Some(msg) = merge_fragments(fragments) else {
            return;
        };
        let thread = msg.thread_id.filter(|_| self.frontend.supports_threads());

        match msg.command() {
            Some("full") => self.show_full(&msg, thread).await,
            Some(other) => {
                let text = format!(
                    "Unknown command /{other}. Reply to a bridged email to answer it.\n\n{USAGE}"
                );
                self.notice(thread, &text).await;
            }
            None => match self.reply_target(&msg, thread) {
                Some(uid) => self.reply(uid, &msg, thread).await,
                None if thread.is_some() => {
                    self.notice(
                        thread,
                        "I can't tell which email this thread belongs to. \
                         Reply directly to one of its messages.",
                    )
                    .await;
                }
                None => self.compose(&msg, thread).await,
            },
        }
    }

    /// UID a chat message answers: the quoted message's marker, else the
    /// thread's representative.
    fn reply_target(&self, msg: &InboundMessage, thread: Option<ThreadId>) -> Option<u32> {
        msg.reply_to
            .as_ref()
            .and_then(|r| decode_marker(&r.text))
            .or_else(|| thread.and_then(|t| self.conversations.representative(t)))
    }

    async fn fetch_original(
        conn: &mut ConnectionManager,
        mailbox: &str,
        uid: u32,
    ) -> Result<ParsedEmail, MailError> {
        conn.select(mailbox).await?;
        let raw = conn.fetch(uid).await?;
        parse_email(&raw)
    }

    async fn send_reply(
        &self,
        uid: u32,
        body: String,
        attachments: Vec<Attachment>,
    ) -> Result<Vec<String>, ActionError> {
        let mut session = self.session.exclusive().await;
        let original = Self::fetch_original(&mut session, &self.settings.mailbox, uid)
            .await
            .map_err(ActionError::Fetch)?;
        let mail = OutgoingMail::reply_to(&original, body).with_attachments(attachments);
        self.sender.send(&mail).await.map_err(ActionError::Send)?;
        Ok(mail.to)
    }

    async fn reply(&self, uid: u32, msg: &InboundMessage, thread: Option<ThreadId>) {
        let body = strip_marker(msg.text.trim());
        if body.trim().is_empty() && msg.attachments.is_empty() {
            self.notice(thread, "Nothing to send: write some text or attach a file.")
                .await;
            return;
        }

        match self.send_reply(uid, body, msg.attachments.clone()).await {
            Ok(to) => {
                info!(uid, to = %to.join(", "), "reply sent");
                self.notice(thread, &format!("✅ Reply sent to {}", to.join(", ")))
                    .await;
            }
            Err(e) => {
                warn!(uid, error = %e, "reply failed");
                self.notice(thread, &format!("❌ Reply not sent: {e}")).await;
            }
        }
    }

    async fn compose(&self, msg: &InboundMessage, thread: Option<ThreadId>) {
        let request = match parse_compose(&msg.text) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = ?e, "malformed compose input");
                self.notice(thread, &e.to_string()).await;
                return;
            }
        };

        let mail = OutgoingMail {
            to: request.to,
            subject: request.subject,
            body: request.body,
            attachments: msg.attachments.clone(),
            ..Default::default()
        };

        let result = {
            let _session = self.session.exclusive().await;
            self.sender.send(&mail).await
        };
        match result {
            Ok(()) => {
                info!(to = %mail.to.join(", "), "new email sent");
                self.notice(thread, &format!("✅ Email sent to {}", mail.to.join(", ")))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "compose failed");
                let e = ActionError::Send(e);
                self.notice(thread, &format!("❌ Email not sent: {e}")).await;
            }
        }
    }

    async fn show_full(&self, msg: &InboundMessage, thread: Option<ThreadId>) {
        let Some(uid) = self.reply_target(msg, thread) else {
            self.notice(thread, "Reply /full to a bridged email to see it with formatting.")
                .await;
            return;
        };

        let result = self.full_view(uid, thread).await;
        if let Err(e) = result {
            warn!(uid, error = %e, "full view failed");
            self.notice(thread, &format!("❌ {e}")).await;
        }
    }

    async fn full_view(&self, uid: u32, thread: Option<ThreadId>) -> Result<(), ActionError> {
        let email = {
            let mut session = self.session.exclusive().await;
            Self::fetch_original(&mut session, &self.settings.mailbox, uid)
                .await
                .map_err(ActionError::Fetch)?
        };
        let html = render_email(&email, None, RenderMode::Rich);
        self.deliver(thread, uid, &html, &[])
            .await
            .map_err(ActionError::Deliver)
    }

    async fn notice(&self, thread: Option<ThreadId>, text: &str) {
        if let Err(e) = self.frontend.notify(thread, text).await {
            warn!(error = %e, "failed to notify user");
        }
    }
}

/// One logical command from an album: first fragment's context, all texts
/// joined, all attachments in order.
fn merge_fragments(fragments: Vec<InboundMessage>) -> Option<InboundMessage> {
    let mut iter = fragments.into_iter();
    let mut merged = iter.next()?;
    for fragment in iter {
        if merged.reply_to.is_none() {
            merged.reply_to = fragment.reply_to;
        }
        if merged.thread_id.is_none() {
            merged.thread_id = fragment.thread_id;
        }
        if !fragment.text.trim().is_empty() {
            if !merged.text.trim().is_empty() {
                merged.text.push('\n');
            }
            merged.text.push_str(&fragment.text);
        }
        merged.attachments.extend(fragment.attachments);
    }
    Some(merged)
}

#[async_trait]
impl MessageSink for ConversationBridge {
    async fn dispatch(&self, uid: u32, email: &ParsedEmail) -> anyhow::Result<()> {
        let thread = self.thread_for(uid, email).await?;
        let classification = self.classify(email).await;
        let html = render_email(email, classification.as_ref(), RenderMode::Text);

        let attachments: &[Attachment] = if self.settings.forward_attachments {
            &email.attachments
        } else {
            &[]
        };
        self.deliver(thread, uid, &html, attachments).await?;

        if let Some(thread) = thread {
            if let Err(e) = self.conversations.set_representative(thread, uid) {
                warn!(thread, uid, error = %e, "failed to persist thread representative");
            }
        }
        info!(uid, thread = ?thread, "mail bridged to chat");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::tests::{MockFrontend, Sent};
    use mailgram_classifier::Verdict;
    use mailgram_mail::{ConnectionPolicy, IdleOutcome, MailTransport, PushGate};
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    // ── Fakes ──

    #[derive(Clone, Default)]
    struct FakeMail {
        messages: Arc<StdMutex<BTreeMap<u32, Vec<u8>>>>,
    }

    #[async_trait]
    impl MailTransport for FakeMail {
        async fn connect(&mut self) -> Result<(), MailError> {
            Ok(())
        }

        async fn select(&mut self, _mailbox: &str) -> Result<(), MailError> {
            Ok(())
        }

        async fn search_uids(&mut self) -> Result<Vec<u32>, MailError> {
            Ok(self.messages.lock().unwrap().keys().copied().collect())
        }

        async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
            self.messages
                .lock()
                .unwrap()
                .get(&uid)
                .cloned()
                .ok_or(MailError::MissingMessage(uid))
        }

        async fn idle(
            &mut self,
            _refresh: Duration,
            _gate: &mut PushGate,
        ) -> Result<IdleOutcome, MailError> {
            Ok(IdleOutcome::Interrupted)
        }

        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: StdMutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    struct FixedClassifier(Option<Classification>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _input: &str) -> anyhow::Result<Classification> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("service down"))
        }

        fn display_name(&self) -> &str {
            "fixed"
        }
    }

    fn raw_message(uid: u32, subject: &str, body: &str) -> Vec<u8> {
        format!(
            "From: Sender {uid} <sender{uid}@example.com>\r\nSubject: {subject}\r\nMessage-ID: <{uid}@example.com>\r\n\r\n{body}\r\n"
        )
        .into_bytes()
    }

    fn email(subject: &str, body: &str) -> ParsedEmail {
        ParsedEmail {
            sender: "alice@example.com".into(),
            subject: subject.into(),
            text: body.into(),
            ..Default::default()
        }
    }

    struct Harness {
        bridge: Arc<ConversationBridge>,
        frontend: Arc<MockFrontend>,
        sender: Arc<RecordingSender>,
        conversations: Arc<ConversationMap>,
        mail: FakeMail,
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            mailbox: "INBOX".into(),
            max_chunk_chars: 4096,
            forward_attachments: true,
            album_debounce: Duration::from_millis(50),
        }
    }

    fn harness_with(
        frontend: MockFrontend,
        classifier: Option<Arc<dyn Classifier>>,
        settings: BridgeSettings,
    ) -> Harness {
        let frontend = Arc::new(frontend);
        let sender = Arc::new(RecordingSender::default());
        let conversations = Arc::new(ConversationMap::in_memory());
        let mail = FakeMail::default();
        let session = Arc::new(SharedSession::new(ConnectionManager::new(
            Box::new(mail.clone()),
            ConnectionPolicy::default(),
        )));
        let bridge = ConversationBridge::new(
            frontend.clone(),
            conversations.clone(),
            session,
            sender.clone(),
            classifier,
            settings,
        );
        Harness {
            bridge,
            frontend,
            sender,
            conversations,
            mail,
        }
    }

    fn harness(frontend: MockFrontend) -> Harness {
        harness_with(frontend, None, settings())
    }

    // ── Outbound ──

    #[tokio::test]
    async fn test_dispatch_reuses_thread_per_subject() {
        let h = harness(MockFrontend::with_threads());
        h.bridge.dispatch(11, &email("Budget 2025", "first")).await.unwrap();
        h.bridge.dispatch(12, &email("RE: budget 2025", "second")).await.unwrap();
        h.bridge.dispatch(14, &email("Other", "third")).await.unwrap();

        let threads: Vec<_> = h
            .frontend
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Thread(title, id) => Some((title, id)),
                _ => None,
            })
            .collect();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].0, "Budget 2025");

        let budget = h.conversations.thread_for("budget 2025").unwrap();
        assert_eq!(h.conversations.representative(budget), Some(12));
        assert_eq!(h.conversations.len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_without_threads() {
        let h = harness(MockFrontend::default());
        h.bridge.dispatch(3, &email("Hi", "body")).await.unwrap();
        let sent = h.frontend.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Text(None, t) if t.contains("body")));
        assert!(h.conversations.is_empty());
    }

    #[tokio::test]
    async fn test_long_message_is_chunked_with_marker_last() {
        let mut s = settings();
        s.max_chunk_chars = 200;
        let h = harness_with(MockFrontend::default(), None, s);
        let body = (0..60).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        h.bridge.dispatch(77, &email("Long", &body)).await.unwrap();

        let texts = h.frontend.texts();
        assert!(texts.len() > 1);
        for t in &texts {
            assert!(t.chars().count() <= 200);
        }
        let (last, rest) = texts.split_last().unwrap();
        assert_eq!(decode_marker(last), Some(77));
        assert!(rest.iter().all(|t| decode_marker(t).is_none()));
        assert!(last.contains("line 59"));
    }

    #[tokio::test]
    async fn test_long_message_at_default_size_is_not_truncated() {
        let h = harness(MockFrontend::default());
        let body = (0..1500).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        h.bridge.dispatch(90, &email("Digest", &body)).await.unwrap();

        let texts = h.frontend.texts();
        assert!(texts.len() >= 3);
        for t in &texts {
            assert!(t.chars().count() <= 4096);
        }
        let joined = texts.concat();
        for i in [0, 750, 1499] {
            assert!(joined.contains(&format!("line {i}")));
        }
        let (last, rest) = texts.split_last().unwrap();
        assert!(last.contains("line 1499"));
        assert_eq!(decode_marker(last), Some(90));
        assert!(rest.iter().all(|t| decode_marker(t).is_none()));
    }

    #[tokio::test]
    async fn test_attachment_failure_is_aggregated() {
        let frontend = MockFrontend::default();
        frontend
            .failing_documents
            .lock()
            .unwrap()
            .insert("bad.bin".into());
        let h = harness(frontend);

        let mut e = email("Files", "see attached");
        e.attachments = vec![
            Attachment::new("bad.bin", "application/octet-stream", vec![1]),
            Attachment::new("good.pdf", "application/pdf", vec![2]),
            Attachment::new("empty.txt", "text/plain", Vec::new()),
        ];
        let err = h.bridge.dispatch(5, &e).await.unwrap_err();
        let err = err.downcast::<DispatchError>().unwrap();
        assert!(matches!(err, DispatchError::Partial { failed: 1, total: 3, .. }));

        // Remaining attachment still sent, empty one skipped
        let docs: Vec<_> = h
            .frontend
            .sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Document(..)))
            .collect();
        assert_eq!(docs, vec![Sent::Document(None, "good.pdf".into())]);
    }

    #[tokio::test]
    async fn test_thread_creation_failure_fails_dispatch() {
        let frontend = MockFrontend::with_threads();
        frontend
            .fail_threads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let h = harness(frontend);
        let err = h.bridge.dispatch(1, &email("X", "y")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::Thread(_))
        ));
        assert!(h.frontend.texts().is_empty());
    }

    #[tokio::test]
    async fn test_classifier_failure_renders_plain() {
        let classifier: Arc<dyn Classifier> = Arc::new(FixedClassifier(None));
        let h = harness_with(MockFrontend::default(), Some(classifier), settings());
        h.bridge.dispatch(1, &email("Hi", "plain body")).await.unwrap();
        let texts = h.frontend.texts();
        assert!(texts[0].contains("plain body"));
        assert!(!texts[0].contains("spam"));
    }

    #[tokio::test]
    async fn test_spam_is_flagged() {
        let classifier: Arc<dyn Classifier> = Arc::new(FixedClassifier(Some(Classification {
            verdict: Verdict::Spam,
            ..Default::default()
        })));
        let h = harness_with(MockFrontend::default(), Some(classifier), settings());
        h.bridge.dispatch(1, &email("Win", "prize")).await.unwrap();
        assert!(h.frontend.texts()[0].contains("Possible spam or phishing"));
    }

    // ── Inbound ──

    #[tokio::test]
    async fn test_compose_sends_one_mail() {
        let h = harness(MockFrontend::default());
        h.bridge
            .handle_inbound(InboundMessage::new(1, "42", 10, "a@b.com\nHello\nBody text"))
            .await;

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@b.com"]);
        assert_eq!(sent[0].subject, "Hello");
        assert_eq!(sent[0].body, "Body text");
        assert!(sent[0].in_reply_to.is_none());
        assert!(h.frontend.notices()[0].starts_with("✅ Email sent to a@b.com"));
    }

    #[tokio::test]
    async fn test_malformed_compose_gets_instructions() {
        let h = harness(MockFrontend::default());
        h.bridge
            .handle_inbound(InboundMessage::new(1, "42", 10, "not-an-email\nSubject\nBody"))
            .await;

        assert!(h.sender.sent.lock().unwrap().is_empty());
        let notices = h.frontend.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("recipient@example.com"));
    }

    #[tokio::test]
    async fn test_reply_via_marker() {
        let h = harness(MockFrontend::default());
        h.mail
            .messages
            .lock()
            .unwrap()
            .insert(7, raw_message(7, "Invoice", "Please pay"));

        let quoted = format!("📧 Sender 7\nPlease pay{}", encode_marker(7));
        let msg = InboundMessage::new(1, "42", 20, "Paid, thanks").with_reply_to(19, quoted);
        h.bridge.handle_inbound(msg).await;

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["sender7@example.com"]);
        assert_eq!(sent[0].subject, "Re: Invoice");
        assert_eq!(sent[0].body, "Paid, thanks");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("<7@example.com>"));
        assert!(h.frontend.notices()[0].starts_with("✅ Reply sent"));
    }

    #[tokio::test]
    async fn test_reply_via_thread_representative() {
        let h = harness(MockFrontend::with_threads());
        h.mail
            .messages
            .lock()
            .unwrap()
            .insert(9, raw_message(9, "Plans", "Dinner?"));
        h.conversations.insert("plans", 55, 9).unwrap();

        let msg = InboundMessage::new(1, "42", 30, "Sure").with_thread(55);
        h.bridge.handle_inbound(msg).await;

        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Re: Plans");
        assert!(matches!(
            &h.frontend.sent()[0],
            Sent::Notice(Some(55), t) if t.starts_with("✅")
        ));
    }

    #[tokio::test]
    async fn test_reply_to_missing_message_reports_failure() {
        let h = harness(MockFrontend::default());
        let msg = InboundMessage::new(1, "42", 20, "hello")
            .with_reply_to(19, format!("x{}", encode_marker(404)));
        h.bridge.handle_inbound(msg).await;

        assert!(h.sender.sent.lock().unwrap().is_empty());
        let notice = &h.frontend.notices()[0];
        assert!(notice.starts_with("❌ Reply not sent"));
        assert!(notice.contains("could not load the original email"));
    }

    #[tokio::test]
    async fn test_unknown_thread_is_not_composed() {
        let h = harness(MockFrontend::with_threads());
        let msg = InboundMessage::new(1, "42", 30, "a@b.com\nHello\nBody").with_thread(99);
        h.bridge.handle_inbound(msg).await;
        assert!(h.sender.sent.lock().unwrap().is_empty());
        assert!(h.frontend.notices()[0].contains("which email"));
    }

    #[tokio::test]
    async fn test_album_becomes_one_compose() {
        let h = harness(MockFrontend::default());
        let first = InboundMessage::new(1, "42", 40, "a@b.com\nPhotos\nFrom the trip")
            .with_media_group("album-1")
            .with_attachment(Attachment::new("1.jpg", "image/jpeg", vec![1]));
        let second = InboundMessage::new(1, "42", 41, "")
            .with_media_group("album-1")
            .with_attachment(Attachment::new("2.jpg", "image/jpeg", vec![2]));
        h.bridge.handle_inbound(first).await;
        h.bridge.handle_inbound(second).await;
        assert!(h.sender.sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let sent = h.sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Photos");
        let names: Vec<_> = sent[0].attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["1.jpg", "2.jpg"]);
    }

    #[tokio::test]
    async fn test_full_command_resends_whole_message() {
        let mut s = settings();
        s.max_chunk_chars = 1000;
        let h = harness_with(MockFrontend::default(), None, s);
        let body = "y".repeat(3050);
        h.mail
            .messages
            .lock()
            .unwrap()
            .insert(8, raw_message(8, "Report", &body));

        let msg = InboundMessage::new(1, "42", 50, "/full")
            .with_reply_to(49, format!("preview{}", encode_marker(8)));
        h.bridge.handle_inbound(msg).await;

        let texts = h.frontend.texts();
        assert!(texts.len() > 1);
        let joined: String = texts.concat();
        assert_eq!(joined.matches('y').count(), body.len());
        assert_eq!(decode_marker(texts.last().unwrap()), Some(8));
        assert!(h.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_without_target() {
        let h = harness(MockFrontend::default());
        h.bridge
            .handle_inbound(InboundMessage::new(1, "42", 50, "/full"))
            .await;
        assert!(h.frontend.notices()[0].contains("Reply /full"));
    }

    #[test]
    fn test_merge_fragments() {
        let merged = merge_fragments(vec![
            InboundMessage::new(1, "42", 1, "first").with_attachment(Attachment::new(
                "a",
                "x/y",
                vec![1],
            )),
            InboundMessage::new(1, "42", 2, "")
                .with_reply_to(9, "quoted")
                .with_attachment(Attachment::new("b", "x/y", vec![2])),
            InboundMessage::new(1, "42", 3, "second"),
        ])
        .unwrap();
        assert_eq!(merged.text, "first\nsecond");
        assert_eq!(merged.attachments.len(), 2);
        assert_eq!(merged.reply_to.unwrap().message_id, 9);
        assert!(merge_fragments(Vec::new()).is_none());
    }
}
