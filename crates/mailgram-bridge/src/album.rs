//! AlbumAggregator — debounced grouping of multi-part chat input.
//!
//! A chat upload of several files arrives as separate updates sharing a
//! group id. Each fragment restarts a short timer for its group; when the
//! timer runs out, the whole group is handed to the flush callback at once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives a completed group: its id and the fragments in arrival order.
pub type FlushFn<T> =
    Arc<dyn Fn(String, Vec<T>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Pending<T> {
    generation: u64,
    fragments: Vec<T>,
    timer: JoinHandle<()>,
}

struct Groups<T> {
    pending: HashMap<String, Pending<T>>,
    next_generation: u64,
}

pub struct AlbumAggregator<T> {
    debounce: Duration,
    groups: Arc<Mutex<Groups<T>>>,
    on_flush: FlushFn<T>,
}

impl<T: Clone + Send + 'static> AlbumAggregator<T> {
    pub fn new(debounce: Duration, on_flush: FlushFn<T>) -> Self {
        Self {
            debounce,
            groups: Arc::new(Mutex::new(Groups {
                pending: HashMap::new(),
                next_generation: 0,
            })),
            on_flush,
        }
    }

    /// Buffer `fragment` under `group_id`.
    ///
    /// Returns `false` when there is no group id; the caller then handles
    /// the fragment on its own. `true` means the fragment now belongs to
    /// the group and will arrive through the flush callback.
    pub fn offer(&self, group_id: Option<&str>, fragment: &T) -> bool {
        let Some(group_id) = group_id else {
            return false;
        };

        let mut groups = match self.groups.lock() {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "album buffer poisoned, handling fragment alone");
                return false;
            }
        };
        groups.next_generation += 1;
        let generation = groups.next_generation;
        let timer = self.spawn_timer(group_id.to_string(), generation);

        match groups.pending.get_mut(group_id) {
            Some(entry) => {
                entry.timer.abort();
                entry.timer = timer;
                entry.generation = generation;
                entry.fragments.push(fragment.clone());
                debug!(group = group_id, fragments = entry.fragments.len(), "album fragment buffered");
            }
            None => {
                groups.pending.insert(
                    group_id.to_string(),
                    Pending {
                        generation,
                        fragments: vec![fragment.clone()],
                        timer,
                    },
                );
                debug!(group = group_id, "album started");
            }
        }
        true
    }

    fn spawn_timer(&self, group_id: String, generation: u64) -> JoinHandle<()> {
        let groups = Arc::clone(&self.groups);
        let on_flush = Arc::clone(&self.on_flush);
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let fragments = {
                let Ok(mut groups) = groups.lock() else { return };
                // A newer fragment or a flush may have replaced this entry
                let current = groups
                    .pending
                    .get(&group_id)
                    .is_some_and(|p| p.generation == generation);
                if !current {
                    return;
                }
                match groups.pending.remove(&group_id) {
                    Some(p) => p.fragments,
                    None => return,
                }
            };

            debug!(group = %group_id, fragments = fragments.len(), "album complete");
            on_flush(group_id, fragments).await;
        })
    }

    /// Number of groups still collecting fragments.
    pub fn pending(&self) -> usize {
        self.groups.lock().map(|g| g.pending.len()).unwrap_or(0)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
