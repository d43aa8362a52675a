//! Client-side query result cache.
//!
//! The router only needs [`QueryCache::invalidate`]. [`InMemoryQueryCache`]
//! is a reactive implementation: invalidating a key marks every entry under
//! that prefix stale and broadcasts the key so views can refetch.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tenantry_core::{QueryKey, Timestamp};
use tokio::sync::broadcast;

/// Cache that can drop dependent views on demand.
pub trait QueryCache: Send + Sync {
    /// Mark `key` and every key it prefixes as needing a refetch.
    fn invalidate(&self, key: &QueryKey);
}

/// A cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery {
    pub value: Value,
    pub stale: bool,
    pub updated_at: Timestamp,
}

/// In-memory reactive cache keyed by [`QueryKey`].
#[derive(Debug)]
pub struct InMemoryQueryCache {
    entries: RwLock<HashMap<QueryKey, CachedQuery>>,
    tx: broadcast::Sender<QueryKey>,
    invalidations: AtomicU64,
}

impl InMemoryQueryCache {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::with_channel_capacity(Self::DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            tx,
            invalidations: AtomicU64::new(0),
        }
    }

    /// Store a fresh result under `key`.
    pub fn put(&self, key: QueryKey, value: Value) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(
            key,
            CachedQuery {
                value,
                stale: false,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// True when the key is cached and has been invalidated since.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.get(key).map(|entry| entry.stale).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every invalidated key from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.tx.subscribe()
    }

    /// Total invalidate calls served.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache for InMemoryQueryCache {
    fn invalidate(&self, key: &QueryKey) {
        let marked = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let mut marked = 0usize;
            for (cached, entry) in entries.iter_mut() {
                if key.is_prefix_of(cached) {
                    entry.stale = true;
                    marked += 1;
                }
            }
            marked
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);

        // No subscribers is fine; views that are not mounted refetch lazily.
        let receivers = self.tx.send(key.clone()).unwrap_or(0);
        tracing::trace!(%key, marked, receivers, "Invalidated query key");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalidate_marks_prefix_stale() {
        let cache = InMemoryQueryCache::new();
        let id = "e1";
        cache.put(QueryKey::root("employees"), json!([]));
        cache.put(QueryKey::root("employee").with(id), json!({"id": id}));
        cache.put(QueryKey::root("employee-documents").with(id), json!([]));

        cache.invalidate(&QueryKey::root("employee"));

        assert!(cache.is_stale(&QueryKey::root("employee").with(id)));
        assert!(!cache.is_stale(&QueryKey::root("employees")));
        assert!(!cache.is_stale(&QueryKey::root("employee-documents").with(id)));
        assert_eq!(cache.invalidation_count(), 1);
    }

    #[test]
    fn test_put_refreshes_stale_entry() {
        let cache = InMemoryQueryCache::new();
        let key = QueryKey::root("tasks");
        cache.put(key.clone(), json!([1]));
        cache.invalidate(&key);
        assert!(cache.is_stale(&key));

        cache.put(key.clone(), json!([1, 2]));
        assert!(!cache.is_stale(&key));
        assert_eq!(cache.get(&key).unwrap().value, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_subscribers_observe_invalidated_keys() {
        let cache = InMemoryQueryCache::new();
        let mut rx = cache.subscribe();

        cache.invalidate(&QueryKey::root("projects"));
        assert_eq!(rx.recv().await.unwrap(), QueryKey::root("projects"));
    }

    #[test]
    fn test_invalidate_unknown_key_is_harmless() {
        let cache = InMemoryQueryCache::new();
        cache.invalidate(&QueryKey::root("nothing"));
        assert!(cache.is_empty());
        assert!(!cache.is_stale(&QueryKey::root("nothing")));
    }
}
