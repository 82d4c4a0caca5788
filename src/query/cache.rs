use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use crate::index::materialized::EntryKey;

/// Matched, sorted and paged entry keys, cached per index snapshot.
///
/// Keys carry the snapshot sequence and the index generation, so a cached
/// page is never served against a different view of the index.
pub struct QueryCache {
    cache: Mutex<LruCache<QueryKey, CachedPage>>,
    capacity: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct QueryKey {
    pub index: String,
    pub generation: u64,
    pub sequence: u64,
    /// Serialized predicate, ordering and paging.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct CachedPage {
    pub items: PageItems,
    pub total_results: usize,
}

/// A page of index rows with their scores, or of distinct source documents.
#[derive(Debug, Clone)]
pub enum PageItems {
    Entries(Vec<(EntryKey, f32)>),
    Documents(Vec<String>),
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        QueryCache {
            cache: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedPage> {
        let mut cache = self.cache.lock();
        if let Some(page) = cache.get(key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(page.clone())
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, key: QueryKey, page: CachedPage) {
        self.cache.lock().put(key, page);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
