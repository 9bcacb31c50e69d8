//! In-memory request cache with in-flight de-duplication.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use kpi_core::{CacheStats, Factory, RequestCache, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::clock::{Clock, SystemClock};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

/// A fetch, possibly still running, shared by every caller of one key.
struct CacheEntry<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: u64,
    fetch: SharedFetch<T>,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl<T> CacheEntry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age >= TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX)
    }
}

/// Request cache backed by a `HashMap` of shared futures.
///
/// The first caller for a key runs the factory and stores the resulting
/// future before it settles; later callers within the TTL await that same
/// future. Expired entries are evicted lazily when their key is next
/// requested (or by [`RequestCache::purge_expired`]). Failed fetches are
/// evicted as soon as they settle.
///
/// The map lock is never held across the fetch itself.
pub struct InMemoryRequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T> fmt::Debug for InMemoryRequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRequestCache")
            .field("clock", &self.clock)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<T> Default for InMemoryRequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryRequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new empty cache using wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new empty cache with an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            next_id: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the live entry's fetch for `key`, or stores a new one built by `factory`.
    async fn join_or_start(
        &self,
        key: &str,
        ttl: Duration,
        factory: Factory<T>,
    ) -> (u64, SharedFetch<T>) {
        let mut entries = self.entries.lock().await;
        let now = self.clock.now();

        // A settled failure its caller has not evicted yet is treated as absent.
        let live = entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .filter(|entry| !matches!(entry.fetch.peek(), Some(Err(_))))
            .map(|entry| (entry.id, entry.fetch.clone()));
        if let Some(hit) = live {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Request cache hit");
            return hit;
        }

        if entries.remove(key).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted expired or failed request cache entry");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(ttl_ms = ttl.as_millis() as u64, "Request cache miss");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fetch = factory().shared();
        entries.insert(
            key.to_string(),
            CacheEntry {
                id,
                fetch: fetch.clone(),
                created_at: now,
                ttl,
            },
        );
        (id, fetch)
    }
}

#[async_trait]
impl<T> RequestCache<T> for InMemoryRequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[instrument(skip(self, factory), fields(key = %key))]
    async fn get(&self, key: &str, ttl: Duration, factory: Factory<T>) -> Result<T> {
        let (id, fetch) = self.join_or_start(key, ttl, factory).await;
        let result = fetch.await;

        if let Err(e) = &result {
            let mut entries = self.entries.lock().await;
            // A newer entry may already have replaced ours.
            if entries.get(key).is_some_and(|entry| entry.id == id) {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Evicted failed request");
            }
        }

        result
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.lock().await.remove(key).is_some();
        if removed {
            debug!("Invalidated request cache entry");
        }
        removed
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Purged {} expired request cache entries", removed);
        }
        removed
    }

    #[instrument(skip(self))]
    async fn clear(&self) {
        self.entries.lock().await.clear();
        debug!("Cleared all request cache entries");
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
