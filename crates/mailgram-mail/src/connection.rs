//! ConnectionManager — sole owner of the inbound mail session.
//!
//! State machine:
//! ```text
//! Disconnected → Connecting → Authenticated ⇄ Idling
//!       ↑             │              │
//!       └─────────────┴── any connection error
//! ```
//!
//! `ensure()` redials with exponential backoff (doubling, capped), forever
//! unless an attempt bound is set. Every protocol call has a bounded wait;
//! a timeout or connection error drops the session to `Disconnected`.

use std::time::Duration;

use mailgram_core::config::schema::SyncConfig;
use tracing::{debug, info, warn};

use crate::error::MailError;
use crate::transport::{IdleOutcome, MailTransport, PushGate};

/// Session lifecycle as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Idling,
}

// ─────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────

/// Doubling reconnect delay with a cap.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns double (up to the cap).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay (after a successful connect).
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ─────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────

/// Timing knobs for a `ConnectionManager`.
#[derive(Clone, Debug)]
pub struct ConnectionPolicy {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Bound for connect, select and search.
    pub command_timeout: Duration,
    /// Bound for a single message fetch.
    pub fetch_timeout: Duration,
    /// `None` = retry forever.
    pub max_attempts: Option<u32>,
}

impl ConnectionPolicy {
    pub fn from_sync(sync: &SyncConfig) -> Self {
        Self {
            backoff_initial: sync.backoff_initial(),
            backoff_max: sync.backoff_max(),
            command_timeout: sync.command_timeout(),
            fetch_timeout: sync.fetch_timeout(),
            max_attempts: None,
        }
    }

    /// Same policy with a finite attempt count (credential validation).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::from_sync(&SyncConfig::default())
    }
}

// ─────────────────────────────────────────────
// ConnectionManager
// ─────────────────────────────────────────────

/// Owns the one session to the mail server.
pub struct ConnectionManager {
    transport: Box<dyn MailTransport>,
    state: ConnectionState,
    selected: Option<String>,
    backoff: Backoff,
    policy: ConnectionPolicy,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn MailTransport>, policy: ConnectionPolicy) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            selected: None,
            backoff: Backoff::new(policy.backoff_initial, policy.backoff_max),
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "connection state");
            self.state = next;
        }
    }

    /// Forget the session without talking to the server.
    pub fn mark_disconnected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("mail session marked disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
        self.selected = None;
    }

    /// Update state after a protocol call.
    fn observe<T>(&mut self, result: &Result<T, MailError>) {
        if let Err(e) = result {
            if e.is_connection_error() {
                warn!(error = %e, "mail session lost");
                self.mark_disconnected();
            }
        }
    }

    async fn bounded<T>(
        op: &'static str,
        limit: Duration,
        fut: impl std::future::Future<Output = Result<T, MailError>>,
    ) -> Result<T, MailError> {
        match tokio::time::timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => Err(MailError::Timeout {
                op,
                secs: limit.as_secs(),
            }),
        }
    }

    /// A live, authenticated session, redialing as needed.
    pub async fn ensure(&mut self) -> Result<(), MailError> {
        if matches!(
            self.state,
            ConnectionState::Authenticated | ConnectionState::Idling
        ) {
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            // Close any stale session before redialing
            self.transport.close().await;
            self.selected = None;
            self.set_state(ConnectionState::Connecting);
            info!(attempt, "connecting to mail server");

            let result = Self::bounded(
                "connect",
                self.policy.command_timeout,
                self.transport.connect(),
            )
            .await;

            match result {
                Ok(()) => {
                    self.set_state(ConnectionState::Authenticated);
                    self.backoff.reset();
                    info!(attempt, "mail session authenticated");
                    return Ok(());
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    if let Some(max) = self.policy.max_attempts {
                        if attempt >= max {
                            warn!(attempt, error = %e, "giving up on mail server");
                            return Err(MailError::RetriesExhausted {
                                attempts: attempt,
                                last: e.to_string(),
                            });
                        }
                    }
                    let delay = self.backoff.next_delay();
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "mail connect failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Select a mailbox; a no-op if it is already selected.
    pub async fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        self.ensure().await?;
        if self.selected.as_deref() == Some(mailbox) {
            return Ok(());
        }
        let result = Self::bounded(
            "select",
            self.policy.command_timeout,
            self.transport.select(mailbox),
        )
        .await;
        self.observe(&result);
        if result.is_ok() {
            debug!(mailbox, "mailbox selected");
            self.selected = Some(mailbox.to_string());
        }
        result
    }

    /// UIDs of non-deleted messages in the selected mailbox.
    pub async fn search(&mut self) -> Result<Vec<u32>, MailError> {
        if self.state == ConnectionState::Disconnected {
            return Err(MailError::NotConnected);
        }
        let result = Self::bounded(
            "search",
            self.policy.command_timeout,
            self.transport.search_uids(),
        )
        .await;
        self.observe(&result);
        result
    }

    /// Raw bytes of one message.
    pub async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
        if self.state == ConnectionState::Disconnected {
            return Err(MailError::NotConnected);
        }
        let result = Self::bounded("fetch", self.policy.fetch_timeout, self.transport.fetch(uid)).await;
        self.observe(&result);
        result
    }

    /// Enter push-listening until change, refresh, or the gate closing.
    pub async fn idle(
        &mut self,
        refresh: Duration,
        gate: &mut PushGate,
    ) -> Result<IdleOutcome, MailError> {
        self.ensure().await?;
        self.set_state(ConnectionState::Idling);
        // Allow the server time to acknowledge DONE past the refresh period
        let limit = refresh + self.policy.command_timeout;
        let result = Self::bounded("idle", limit, self.transport.idle(refresh, gate)).await;
        if self.state == ConnectionState::Idling {
            self.set_state(ConnectionState::Authenticated);
        }
        self.observe(&result);
        result
    }

    /// Close the session.
    pub async fn close(&mut self) {
        self.transport.close().await;
        self.selected = None;
        self.set_state(ConnectionState::Disconnected);
        info!("mail session closed");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Shared, inspectable state of a `FakeTransport`.
    #[derive(Default)]
    pub(crate) struct FakeMailbox {
        /// uid → raw message
        pub messages: BTreeMap<u32, Vec<u8>>,
        /// Scripted connect results, consumed front to back (empty = Ok).
        pub connect_results: VecDeque<Result<(), MailError>>,
        /// Scripted search failures, consumed front to back.
        pub search_failures: VecDeque<MailError>,
        pub connects: u32,
        pub closes: u32,
        pub selects: Vec<String>,
        pub fetched: Vec<u32>,
        /// Number of sessions currently inside a call (must never exceed 1).
        pub in_call: u32,
        pub max_in_call: u32,
    }

    /// In-memory `MailTransport`. `push.notify_one()` makes the current (or
    /// next) IDLE report a mailbox change.
    #[derive(Clone, Default)]
    pub(crate) struct FakeTransport {
        pub mailbox: Arc<Mutex<FakeMailbox>>,
        pub push: Arc<tokio::sync::Notify>,
    }

    impl FakeTransport {
        pub fn with_messages(uids: &[u32]) -> Self {
            let t = Self::default();
            {
                let mut m = t.mailbox.lock().unwrap();
                for uid in uids {
                    m.messages.insert(*uid, sample_message(*uid));
                }
            }
            t
        }

        fn enter(&self) {
            let mut m = self.mailbox.lock().unwrap();
            m.in_call += 1;
            m.max_in_call = m.max_in_call.max(m.in_call);
        }

        fn leave(&self) {
            self.mailbox.lock().unwrap().in_call -= 1;
        }
    }

    pub(crate) fn sample_message(uid: u32) -> Vec<u8> {
        format!(
            "From: sender{uid}@example.com\r\nSubject: Message {uid}\r\nMessage-ID: <{uid}@example.com>\r\n\r\nBody of {uid}\r\n"
        )
        .into_bytes()
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn connect(&mut self) -> Result<(), MailError> {
            let mut m = self.mailbox.lock().unwrap();
            m.connects += 1;
            m.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
            self.mailbox.lock().unwrap().selects.push(mailbox.to_string());
            Ok(())
        }

        async fn search_uids(&mut self) -> Result<Vec<u32>, MailError> {
            self.enter();
            tokio::task::yield_now().await;
            self.leave();
            let mut m = self.mailbox.lock().unwrap();
            if let Some(e) = m.search_failures.pop_front() {
                return Err(e);
            }
            Ok(m.messages.keys().copied().collect())
        }

        async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
            self.enter();
            tokio::task::yield_now().await;
            self.leave();
            let mut m = self.mailbox.lock().unwrap();
            m.fetched.push(uid);
            m.messages
                .get(&uid)
                .cloned()
                .ok_or(MailError::MissingMessage(uid))
        }

        async fn idle(
            &mut self,
            refresh: Duration,
            gate: &mut PushGate,
        ) -> Result<IdleOutcome, MailError> {
            if !*gate.borrow() {
                return Ok(IdleOutcome::Interrupted);
            }
            tokio::select! {
                _ = crate::transport::gate_closed(gate) => Ok(IdleOutcome::Interrupted),
                _ = self.push.notified() => Ok(IdleOutcome::Changed),
                _ = tokio::time::sleep(refresh) => Ok(IdleOutcome::TimedOut),
            }
        }

        async fn close(&mut self) {
            self.mailbox.lock().unwrap().closes += 1;
        }
    }

    fn fast_policy() -> ConnectionPolicy {
        ConnectionPolicy {
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            command_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(5),
            max_attempts: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(60));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_cap_below_initial() {
        let mut b = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_ensure_retries_then_succeeds() {
        let fake = FakeTransport::default();
        {
            let mut m = fake.mailbox.lock().unwrap();
            m.connect_results.push_back(Err(MailError::Connect("refused".into())));
            m.connect_results.push_back(Err(MailError::Connect("refused".into())));
        }
        let mut conn = ConnectionManager::new(Box::new(fake.clone()), fast_policy());

        conn.ensure().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Authenticated);
        let m = fake.mailbox.lock().unwrap();
        assert_eq!(m.connects, 3);
        // Stale session closed before every attempt
        assert_eq!(m.closes, 3);
    }

    #[tokio::test]
    async fn test_ensure_bounded_attempts() {
        let fake = FakeTransport::default();
        {
            let mut m = fake.mailbox.lock().unwrap();
            for _ in 0..5 {
                m.connect_results.push_back(Err(MailError::Auth("bad password".into())));
            }
        }
        let mut conn =
            ConnectionManager::new(Box::new(fake.clone()), fast_policy().with_max_attempts(3));

        let err = conn.ensure().await.unwrap_err();
        assert!(matches!(err, MailError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(fake.mailbox.lock().unwrap().connects, 3);
    }

    #[tokio::test]
    async fn test_ensure_is_noop_when_connected() {
        let fake = FakeTransport::default();
        let mut conn = ConnectionManager::new(Box::new(fake.clone()), fast_policy());
        conn.ensure().await.unwrap();
        conn.ensure().await.unwrap();
        assert_eq!(fake.mailbox.lock().unwrap().connects, 1);
    }

    #[tokio::test]
    async fn test_select_is_idempotent() {
        let fake = FakeTransport::default();
        let mut conn = ConnectionManager::new(Box::new(fake.clone()), fast_policy());
        conn.select("INBOX").await.unwrap();
        conn.select("INBOX").await.unwrap();
        assert_eq!(fake.mailbox.lock().unwrap().selects, vec!["INBOX"]);
        assert_eq!(conn.selected(), Some("INBOX"));
    }

    #[tokio::test]
    async fn test_connection_error_marks_disconnected() {
        let fake = FakeTransport::with_messages(&[1]);
        fake.mailbox
            .lock()
            .unwrap()
            .search_failures
            .push_back(MailError::Closed("BYE".into()));
        let mut conn = ConnectionManager::new(Box::new(fake.clone()), fast_policy());
        conn.select("INBOX").await.unwrap();

        assert!(conn.search().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.selected().is_none());

        // Next select reconnects and re-selects
        conn.select("INBOX").await.unwrap();
        assert_eq!(conn.search().await.unwrap(), vec![1]);
        assert_eq!(fake.mailbox.lock().unwrap().connects, 2);
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_session() {
        let fake = FakeTransport::default();
        let mut conn = ConnectionManager::new(Box::new(fake.clone()), fast_policy());
        conn.ensure().await.unwrap();
        assert!(matches!(
            conn.fetch(99).await.unwrap_err(),
            MailError::MissingMessage(99)
        ));
        assert_eq!(conn.state(), ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn test_fetch_requires_session() {
        let mut conn =
            ConnectionManager::new(Box::new(FakeTransport::default()), fast_policy());
        assert!(matches!(
            conn.fetch(1).await.unwrap_err(),
            MailError::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_idle_returns_to_authenticated() {
        let fake = FakeTransport::default();
        let mut conn = ConnectionManager::new(Box::new(fake), fast_policy());
        let (_tx, mut gate) = tokio::sync::watch::channel(true);
        let outcome = conn
            .idle(Duration::from_millis(10), &mut gate)
            .await
            .unwrap();
        assert_eq!(outcome, IdleOutcome::TimedOut);
        assert_eq!(conn.state(), ConnectionState::Authenticated);
    }
}
