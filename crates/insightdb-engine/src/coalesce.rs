//! Keyed registry of in-flight computations.
//!
//! The first caller for a key spawns the computation; later callers with the
//! same key await the same shared handle. The spawned task removes its own
//! entry when it finishes. When every waiter has gone away before that, the
//! task is aborted and the entry dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use insightdb_core::error::{Error, Result};
use tokio::task::AbortHandle;

type SharedResult<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

struct Entry<V> {
    id: u64,
    shared: SharedResult<V>,
    waiters: usize,
    abort: AbortHandle,
}

type Registry<V> = Arc<Mutex<HashMap<String, Entry<V>>>>;

pub struct InFlight<V> {
    entries: Registry<V>,
    next_id: AtomicU64,
}

impl<V> Default for InFlight<V> {
    fn default() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), next_id: AtomicU64::new(0) }
    }
}

fn lock<V>(entries: &Mutex<HashMap<String, Entry<V>>>) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
    entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl<V: Send + Sync + 'static> InFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently being computed.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    /// Joins the computation for `key`, starting it with `make` if none is running.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (shared, waiter) = {
            let mut entries = lock(&self.entries);
            if let Some(entry) = entries.get_mut(key) {
                entry.waiters += 1;
                tracing::debug!(key, waiters = entry.waiters, "joining in-flight request");
                (entry.shared.clone(), Waiter { entries: self.entries.clone(), key: key.to_string(), id: entry.id })
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let fut = make();
                let registry = self.entries.clone();
                let owned_key = key.to_string();
                let handle = tokio::spawn(async move {
                    let out = fut.await.map(Arc::new);
                    remove_entry(&registry, &owned_key, id);
                    out
                });
                let abort = handle.abort_handle();
                let shared = async move {
                    match handle.await {
                        Ok(out) => out,
                        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                        Err(e) => Err(Error::Operation(format!("request task failed: {e}"))),
                    }
                }
                .boxed()
                .shared();
                entries.insert(key.to_string(), Entry { id, shared: shared.clone(), waiters: 1, abort });
                (shared, Waiter { entries: self.entries.clone(), key: key.to_string(), id })
            }
        };
        let out = shared.await;
        drop(waiter);
        out
    }
}

fn remove_entry<V>(entries: &Mutex<HashMap<String, Entry<V>>>, key: &str, id: u64) {
    let mut entries = lock(entries);
    if entries.get(key).is_some_and(|e| e.id == id) {
        entries.remove(key);
    }
}

/// Held by each caller while it awaits; the last one to leave early cancels.
struct Waiter<V> {
    entries: Registry<V>,
    key: String,
    id: u64,
}

impl<V> Drop for Waiter<V> {
    fn drop(&mut self) {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(&self.key).filter(|e| e.id == self.id) else {
            return;
        };
        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 {
            entry.abort.abort();
            entries.remove(&self.key);
            tracing::debug!(key = %self.key, "last waiter left, request cancelled");
        }
    }
}
