use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex as FetchLock;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_errors: u64,
    pub entries: usize,
}

pub struct ReadThroughCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    inflight: DashMap<String, Arc<FetchLock<()>>>,
    ttl_ms: AtomicU64,
    counters: CacheCounters,
}

impl<T> ReadThroughCache<T>
where
    T: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            ttl_ms: AtomicU64::new(duration_to_millis(ttl)),
            counters: CacheCounters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(duration_to_millis(ttl), Ordering::Relaxed);
    }

    /// Returns the live value for `key`, or runs `fetcher` and stores its
    /// result. Errors are returned to the caller and never cached.
    pub async fn get<F, Fut, E>(&self, key: &str, fetcher: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(target: "read-cache", key, "cache hit");
            return Ok(value);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FetchLock::new(())))
            .clone();
        let guard = lock.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(value) = self.lookup(key) {
            drop(guard);
            self.release(key, &lock);
            debug!(target: "read-cache", key, "served by concurrent fetch");
            return Ok(value);
        }

        debug!(target: "read-cache", key, "cache miss; fetching");
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = fetcher().await;
        match &outcome {
            Ok(value) => self.put(key, value.clone()),
            Err(_) => {
                self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                debug!(target: "read-cache", key, "fetch failed; nothing cached");
            }
        }
        drop(guard);
        self.release(key, &lock);
        outcome
    }

    /// Live value without fetching. Does not touch the counters.
    pub fn peek(&self, key: &str) -> Option<T> {
        self.lookup(key)
    }

    pub fn put(&self, key: &str, value: T) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        let removed = keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        if removed > 0 {
            debug!(target: "read-cache", prefix, removed, "invalidated by prefix");
        }
        removed
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        debug!(target: "read-cache", "invalidated all entries");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_errors: self.counters.fetch_errors.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn lookup(&self, key: &str) -> Option<T> {
        let ttl = self.ttl();
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() < ttl {
                return Some(entry.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| entry.stored_at.elapsed() >= ttl);
        None
    }

    // The map holds one reference and the caller another; anything above
    // that is a waiter still queued on the lock.
    fn release(&self, key: &str, lock: &Arc<FetchLock<()>>) {
        self.inflight
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, lock) && Arc::strong_count(current) <= 2
            });
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
