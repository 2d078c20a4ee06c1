// src/cache.rs

use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

/// One hour, the validity window of the relational data and connection memos.
pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);

struct Entry<V> {
    value: Arc<V>,
    stored_at: Instant,
}

/// A memo table whose entries go stale after a fixed time-to-live.
///
/// Values are shared as `Arc<V>` and never updated in place: a stale entry is
/// dropped and recomputed wholesale. The lock is held while a value is being
/// computed, so two callers never compute the same key concurrently.
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Entries expire `ttl` after they were stored.
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self::with_ttl(name, Some(ttl))
    }

    /// Entries never expire; only `invalidate`/`clear` drop them.
    pub fn unbounded(name: &'static str) -> Self {
        Self::with_ttl(name, None)
    }

    pub fn with_ttl(name: &'static str, ttl: Option<Duration>) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        match self.ttl {
            Some(ttl) => entry.stored_at.elapsed() < ttl,
            None => true,
        }
    }

    /// The cached value for `key`, if present and still fresh.
    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if self.is_fresh(entry) => Some(Arc::clone(&entry.value)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Return the fresh cached value for `key`, or run `compute` and store
    /// its result. Errors are returned as-is and leave nothing behind.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&key) {
            if self.is_fresh(entry) {
                debug!(cache = self.name, key = ?key, "cache hit");
                return Ok(Arc::clone(&entry.value));
            }
            debug!(cache = self.name, key = ?key, "cache entry expired");
            entries.remove(&key);
        } else {
            debug!(cache = self.name, key = ?key, "cache miss");
        }

        let value = Arc::new(compute().await?);
        entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                stored_at: Instant::now(),
            },
        );
        Ok(value)
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.lock().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
