use crate::entry::Page;
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SHARDS: usize = 64;

type Shard = RwLock<HashMap<String, Arc<Page>>>;

/// Snapshot of in-process cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Process-wide map from cache key to the latest known [`Page`].
///
/// Keys are spread over 64 independent shards, each behind its own
/// `RwLock`, so lookups for different pages never contend. There is no
/// eviction: entries live until they are replaced or removed. Concurrent
/// writers to the same key race and the last write wins.
///
/// Construct one per process and hand it to whoever needs it; there is no
/// global instance.
pub struct PageCache {
    shards: Box<[Shard]>,
    hasher: RandomState,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Shard::default()).collect(),
            hasher: RandomState::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        // SHARDS is a power of two.
        let slot = self.hasher.hash_one(key) as usize & (SHARDS - 1);
        &self.shards[slot]
    }

    /// Look up a page by key. Only takes a read lock on one shard.
    pub fn get(&self, key: &str) -> Option<Arc<Page>> {
        let found = self.shard(key).read().get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a page under its own key, replacing whatever was there.
    /// Returns the shared handle now held by the cache.
    pub fn insert(&self, page: Page) -> Arc<Page> {
        let page = Arc::new(page);
        self.shard(page.key())
            .write()
            .insert(page.key().to_string(), Arc::clone(&page));
        page
    }

    /// Drop the entry for `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}
