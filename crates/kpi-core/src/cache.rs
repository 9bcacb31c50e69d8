//! Cache trait for de-duplicating upstream requests.
//!
//! This module defines the [`RequestCache`] trait: async memoization keyed by
//! a request fingerprint with at most one in-flight fetch per key.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Deferred fetch handed to [`RequestCache::get`]. Called at most once.
pub type Factory<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Wraps a closure returning a future into a [`Factory`].
pub fn factory<T, F, Fut>(f: F) -> Factory<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, Result<T>> { Box::pin(f()) })
}

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls served by a live entry, settled or in flight.
    pub hits: u64,
    /// Calls that invoked the factory.
    pub misses: u64,
    /// Entries removed because they expired or their fetch failed.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of calls that did not reach the network.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Async memoization of upstream requests.
///
/// Implementations must guarantee that, for a given key, the factory runs at
/// most once per TTL window no matter how many callers arrive concurrently,
/// and that failed fetches are never replayed.
#[async_trait]
pub trait RequestCache<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns the live value for `key`, or runs `factory` and shares its result.
    ///
    /// The entry is stored before the fetch settles, so concurrent callers
    /// join the same fetch. It expires `ttl` after creation. A failed fetch is
    /// evicted immediately.
    async fn get(&self, key: &str, ttl: Duration, factory: Factory<T>) -> Result<T>;

    /// Removes one entry. Returns true if it existed.
    async fn invalidate(&self, key: &str) -> bool;

    /// Removes expired entries. Returns the number removed.
    async fn purge_expired(&self) -> usize;

    /// Removes all entries.
    async fn clear(&self);

    /// Number of stored entries, expired ones included until next touched.
    async fn len(&self) -> usize;

    /// Returns true when no entries are stored.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns current counters.
    fn stats(&self) -> CacheStats;
}
