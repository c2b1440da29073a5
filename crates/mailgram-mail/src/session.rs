//! Exclusion discipline over the shared mail session.
//!
//! Every operation that touches the session (a sync pass, a reply, a
//! compose, an on-demand fetch) goes through [`SharedSession::exclusive`]:
//! it takes the exclusion lock, closes the push gate so the watcher's IDLE
//! ends, then locks the connection. Dropping the guard reopens the gate
//! before the lock is released.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::transport::PushGate;

/// The one mail session plus its exclusion lock and push gate.
pub struct SharedSession {
    conn: Mutex<ConnectionManager>,
    exclusive: Mutex<()>,
    push: watch::Sender<bool>,
    closed: AtomicBool,
}

impl SharedSession {
    pub fn new(conn: ConnectionManager) -> Self {
        let (push, _) = watch::channel(true);
        Self {
            conn: Mutex::new(conn),
            exclusive: Mutex::new(()),
            push,
            closed: AtomicBool::new(false),
        }
    }

    /// Exclusive access: push listening is paused until the guard drops.
    pub async fn exclusive(&self) -> ExclusiveSession<'_> {
        let permit = self.exclusive.lock().await;
        self.push.send_replace(false);
        let conn = self.conn.lock().await;
        debug!("exclusive session acquired");
        ExclusiveSession {
            conn,
            session: self,
            _permit: permit,
        }
    }

    /// A receiver for the push gate (`true` = listening allowed).
    pub fn push_gate(&self) -> PushGate {
        self.push.subscribe()
    }

    pub fn push_enabled(&self) -> bool {
        *self.push.borrow()
    }

    /// Connection lock for the push listener. Callers must check the gate
    /// after acquiring it.
    pub(crate) async fn lock_for_push(&self) -> MutexGuard<'_, ConnectionManager> {
        self.conn.lock().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop push listening for good and close the session.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.push.send_replace(false);
        let _permit = self.exclusive.lock().await;
        self.conn.lock().await.close().await;
        info!("mail session shut down");
    }

    fn resume_push(&self) {
        if !self.is_closed() {
            self.push.send_replace(true);
        }
    }
}

/// Guard returned by [`SharedSession::exclusive`].
///
/// Field order matters: the connection lock is released before the
/// exclusion permit.
pub struct ExclusiveSession<'a> {
    conn: MutexGuard<'a, ConnectionManager>,
    session: &'a SharedSession,
    _permit: MutexGuard<'a, ()>,
}

impl Deref for ExclusiveSession<'_> {
    type Target = ConnectionManager;

    fn deref(&self) -> &ConnectionManager {
        &self.conn
    }
}

impl DerefMut for ExclusiveSession<'_> {
    fn deref_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }
}

impl Drop for ExclusiveSession<'_> {
    fn drop(&mut self) {
        // Reopen the gate while still holding the exclusion permit
        self.session.resume_push();
        debug!("exclusive session released");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
