//! TTL memo-cache with single-flight refresh and stale fallback.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, warn};

struct Entry<V> {
    value: V,
    fetched_at: Instant,
}

/// Memoizes an expensive lookup per key for `ttl`.
///
/// Readers share a read lock while the entry is fresh. On miss or expiry the
/// caller takes the write lock and re-checks, so concurrent callers for a
/// stale entry trigger a single refresh. If the refresh fails the last known
/// value is returned; the error surfaces only when no value was ever known.
pub struct MemoCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached value for `key`, refreshing through `refresh` when missing or
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns the refresh error only when no previous value exists.
    pub async fn get_or_refresh<F, Fut>(&self, key: &K, refresh: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cached = self.fresh(&*self.entries.read().await, key);
        if let Some(value) = cached {
            return Ok(value);
        }

        let mut entries = self.entries.write().await;
        if let Some(value) = self.fresh(&entries, key) {
            return Ok(value);
        }

        match refresh().await {
            Ok(value) => {
                debug!(?key, "memo-cache refreshed");
                entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(e) => match entries.get(key) {
                Some(stale) => {
                    warn!(?key, error = %format!("{e:#}"), "refresh failed, serving stale value");
                    Ok(stale.value.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Drop the entry for `key`.
    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn fresh(&self, entries: &HashMap<K, Entry<V>>, key: &K) -> Option<V> {
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }
}
