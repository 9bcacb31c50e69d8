//! No-op request cache implementation.

use async_trait::async_trait;
use kpi_core::{CacheStats, Factory, RequestCache, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// A request cache that never stores anything.
///
/// Every `get` runs its factory. Useful for disabling de-duplication or
/// testing code paths without cache hits.
#[derive(Debug, Default)]
pub struct NoopRequestCache {
    misses: AtomicU64,
}

impl NoopRequestCache {
    /// Create a new no-op cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            misses: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<T> RequestCache<T> for NoopRequestCache
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str, _ttl: Duration, factory: Factory<T>) -> Result<T> {
        trace!(key = %key, "NoopRequestCache: get called, running factory");
        self.misses.fetch_add(1, Ordering::Relaxed);
        factory().await
    }

    async fn invalidate(&self, _key: &str) -> bool {
        false
    }

    async fn purge_expired(&self) -> usize {
        0
    }

    async fn clear(&self) {
        trace!("NoopRequestCache: clear called, doing nothing");
    }

    async fn len(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..CacheStats::default()
        }
    }
}
