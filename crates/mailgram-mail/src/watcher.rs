//! MailboxWatcher — detects new mail and hands it to a [`MessageSink`].
//!
//! Two trigger sources feed one channel: a push listener (IDLE) that reports
//! mailbox changes, and a fixed-interval poll. Each trigger starts a sync
//! pass unless one is already in flight, in which case it is dropped.
//!
//! A pass runs under the exclusive session: select, search, then for every
//! UID above the cursor (ascending) fetch, parse, dispatch, and advance the
//! cursor only after the dispatch succeeded.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mailgram_core::config::schema::SyncConfig;
use mailgram_core::cursor::UidCursorStore;
use tokio::sync::{mpsc, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::MailError;
use crate::parser::{parse_email, ParsedEmail};
use crate::session::SharedSession;
use crate::transport::{gate_closed, gate_open, IdleOutcome};

/// Receives each new message, in ascending UID order.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// `Ok` means the message is fully delivered and the cursor may move.
    async fn dispatch(&self, uid: u32, email: &ParsedEmail) -> anyhow::Result<()>;
}

/// Watcher timing.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub mailbox: String,
    pub poll_interval: Duration,
    pub idle_refresh: Duration,
    pub idle_restart_delay: Duration,
}

impl WatcherConfig {
    pub fn from_sync(sync: &SyncConfig) -> Self {
        Self {
            mailbox: sync.mailbox.clone(),
            poll_interval: sync.poll_interval(),
            idle_refresh: sync.idle_refresh(),
            idle_restart_delay: sync.idle_restart_delay(),
        }
    }
}

/// What started a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    Push,
    Poll,
}

/// Outcome of one sync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// UIDs handed to the sink during this pass.
    pub dispatched: Vec<u32>,
    /// UIDs that failed and will be retried.
    pub failed: Vec<u32>,
    /// Set on first run: the cursor was seeded and nothing was dispatched.
    pub seeded: Option<u32>,
    /// Cursor value after the pass.
    pub cursor: u32,
    /// Delivered UIDs the cursor cannot cover yet because an earlier one
    /// keeps failing.
    pub held: usize,
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MailboxWatcher {
    session: Arc<SharedSession>,
    cursor: Arc<UidCursorStore>,
    sink: Arc<dyn MessageSink>,
    config: WatcherConfig,
    in_flight: AtomicBool,
    /// Dispatched but not yet covered by the cursor (an earlier UID failed).
    delivered: Mutex<HashSet<u32>>,
    shutdown: Notify,
}

impl MailboxWatcher {
    pub fn new(
        session: Arc<SharedSession>,
        cursor: Arc<UidCursorStore>,
        sink: Arc<dyn MessageSink>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            session,
            cursor,
            sink,
            config,
            in_flight: AtomicBool::new(false),
            delivered: Mutex::new(HashSet::new()),
            shutdown: Notify::new(),
        }
    }

    /// Run until [`stop`](Self::stop). The first poll tick fires immediately.
    pub async fn run(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<TriggerSource>(8);
        let listener = tokio::spawn(Arc::clone(&self).push_loop(tx));

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            mailbox = %self.config.mailbox,
            poll_secs = self.config.poll_interval.as_secs(),
            "mailbox watcher started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {
                    self.trigger(TriggerSource::Poll);
                }
                Some(source) = rx.recv() => {
                    self.trigger(source);
                }
            }
        }

        listener.abort();
        info!("mailbox watcher stopped");
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    fn claim(&self) -> Option<PassGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(&self.in_flight))
    }

    /// Start a pass in the background. Returns `false` if one is already
    /// running (the trigger is dropped, not queued).
    pub fn trigger(self: &Arc<Self>, source: TriggerSource) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(?source, "sync pass in flight, trigger coalesced");
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = PassGuard(&this.in_flight);
            debug!(?source, "sync pass triggered");
            if let Err(e) = this.pass().await {
                warn!(?source, error = %e, "sync pass failed");
            }
        });
        true
    }

    /// Run one pass now. `Ok(None)` if another pass was already in flight.
    pub async fn sync_once(&self) -> Result<Option<PassReport>, MailError> {
        let Some(_guard) = self.claim() else {
            debug!("sync pass in flight, request coalesced");
            return Ok(None);
        };
        self.pass().await.map(Some)
    }

    async fn list(conn: &mut ConnectionManager, mailbox: &str) -> Result<Vec<u32>, MailError> {
        conn.select(mailbox).await?;
        conn.search().await
    }

    async fn deliver(&self, conn: &mut ConnectionManager, uid: u32) -> anyhow::Result<()> {
        let raw = conn.fetch(uid).await?;
        let email = parse_email(&raw)?;
        debug!(uid, subject = %email.subject, "dispatching message");
        self.sink.dispatch(uid, &email).await
    }

    async fn pass(&self) -> Result<PassReport, MailError> {
        let mut session = self.session.exclusive().await;
        let mailbox = self.config.mailbox.as_str();

        let uids = match Self::list(&mut session, mailbox).await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(error = %e, "mailbox listing failed, reconnecting once");
                session.mark_disconnected();
                Self::list(&mut session, mailbox).await?
            }
        };

        if !self.cursor.exists() {
            let max = uids.iter().copied().max().unwrap_or(0);
            self.cursor.seed(max).await?;
            info!(cursor = max, "first run: cursor seeded, existing mail skipped");
            return Ok(PassReport {
                seeded: Some(max),
                cursor: max,
                ..Default::default()
            });
        }

        let floor = self.cursor.load().await;
        let mut pending: Vec<u32> = uids.into_iter().filter(|uid| *uid > floor).collect();
        pending.sort_unstable();
        pending.dedup();

        let mut report = PassReport::default();
        let mut blocked = false;

        for uid in pending {
            let already = self.delivered_contains(uid);
            if !already {
                match self.deliver(&mut session, uid).await {
                    Ok(()) => {
                        report.dispatched.push(uid);
                        self.delivered_insert(uid);
                    }
                    Err(e) => {
                        warn!(uid, error = %e, "message not dispatched, retrying next pass");
                        report.failed.push(uid);
                        blocked = true;
                        let lost = e
                            .downcast_ref::<MailError>()
                            .is_some_and(MailError::is_connection_error);
                        if lost {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !blocked {
                match self.cursor.advance(uid).await {
                    Ok(_) => self.delivered_remove(uid),
                    Err(e) => {
                        error!(uid, error = %e, "failed to persist cursor");
                        blocked = true;
                    }
                }
            }
        }

        report.cursor = self.cursor.load().await;
        report.held = self.delivered_len();
        if report.held > 0 {
            warn!(
                held = report.held,
                cursor = report.cursor,
                "cursor stalled behind a failing message"
            );
        }
        if report.dispatched.is_empty() && report.failed.is_empty() {
            debug!(cursor = report.cursor, "sync pass: nothing new");
        } else {
            info!(
                dispatched = report.dispatched.len(),
                failed = report.failed.len(),
                cursor = report.cursor,
                "sync pass complete"
            );
        }
        Ok(report)
    }

    fn delivered_contains(&self, uid: u32) -> bool {
        self.delivered
            .lock()
            .map(|set| set.contains(&uid))
            .unwrap_or(false)
    }

    fn delivered_len(&self) -> usize {
        self.delivered.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn delivered_insert(&self, uid: u32) {
        if let Ok(mut set) = self.delivered.lock() {
            set.insert(uid);
        }
    }

    fn delivered_remove(&self, uid: u32) {
        if let Ok(mut set) = self.delivered.lock() {
            set.remove(&uid);
        }
    }

    /// Hold IDLE while the gate is open; report changes on `events`.
    async fn push_loop(self: Arc<Self>, events: mpsc::Sender<TriggerSource>) {
        let mut gate = self.session.push_gate();

        loop {
            if self.session.is_closed() || !gate_open(&mut gate).await {
                break;
            }

            let outcome = {
                let mut conn = self.session.lock_for_push().await;
                let open = *gate.borrow();
                if !open {
                    continue;
                }

                let ready = tokio::select! {
                    r = conn.select(&self.config.mailbox) => r.map(|_| true),
                    _ = gate_closed(&mut gate) => Ok(false),
                };
                match ready {
                    Ok(true) => conn.idle(self.config.idle_refresh, &mut gate).await,
                    Ok(false) => {
                        // Abandoned mid-command; the next user must redial
                        conn.mark_disconnected();
                        Ok(IdleOutcome::Interrupted)
                    }
                    Err(e) => Err(e),
                }
            };

            match outcome {
                Ok(IdleOutcome::Changed) => {
                    debug!("mailbox changed");
                    // A full channel already holds a pending trigger
                    let _ = events.try_send(TriggerSource::Push);
                }
                Ok(IdleOutcome::TimedOut) => debug!("idle refresh"),
                Ok(IdleOutcome::Interrupted) => debug!("idle interrupted"),
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_secs = self.config.idle_restart_delay.as_secs(),
                        "push session failed, restarting"
                    );
                    tokio::time::sleep(self.config.idle_restart_delay).await;
                }
            }
        }
        debug!("push listener exited");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
