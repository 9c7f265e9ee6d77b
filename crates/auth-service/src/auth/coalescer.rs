//! Single-flight deduplication of concurrent work keyed by string.
//!
//! The first caller for a key runs the work; callers that arrive while it is
//! in flight wait on a watch channel and receive a clone of the same outcome.
//! The marker is removed when the leader finishes, so a later call for the
//! same key runs fresh. If the leader is cancelled before publishing, its
//! marker is removed and one waiter takes over as the new leader.
//!
//! The map lock is held only to look up or insert a marker, never across an
//! await.

use crate::observability::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

struct InFlight<T> {
    generation: u64,
    rx: watch::Receiver<Option<T>>,
}

pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, InFlight<T>>>,
    next_generation: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }
}

enum Role<T> {
    Leader(u64, watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

/// Removes the leader's marker on completion or cancellation.
///
/// The sender is a field so it is dropped after the marker is gone; waiters
/// woken by the close then find no stale marker to rejoin.
struct LeaderGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    key: &'a str,
    generation: u64,
    tx: watch::Sender<Option<T>>,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        let mut inflight = self.flight.inflight.lock();
        if inflight
            .get(self.key)
            .is_some_and(|f| f.generation == self.generation)
        {
            inflight.remove(self.key);
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or join an identical in-flight run.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut work = Some(work);

        loop {
            match self.join_or_lead(key) {
                Role::Leader(generation, tx) => {
                    let guard = LeaderGuard {
                        flight: self,
                        key,
                        generation,
                        tx,
                    };

                    // `work` is only taken by a leader, and a caller becomes
                    // leader at most once because it returns below.
                    let Some(work) = work.take() else {
                        continue;
                    };
                    let value = work().await;
                    guard.tx.send_replace(Some(value.clone()));
                    drop(guard);
                    return value;
                }
                Role::Follower(mut rx) => {
                    metrics::record_introspection_coalesced();
                    let shared = rx.wait_for(Option::is_some).await;
                    if let Ok(shared) = shared {
                        if let Some(value) = shared.as_ref() {
                            return value.clone();
                        }
                    }
                    tracing::debug!(
                        target: "auth.coalescer",
                        "In-flight leader cancelled, retrying"
                    );
                }
            }
        }
    }

    fn join_or_lead(&self, key: &str) -> Role<T> {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(key) {
            return Role::Follower(existing.rx.clone());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        inflight.insert(key.to_string(), InFlight { generation, rx });
        Role::Leader(generation, tx)
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}
