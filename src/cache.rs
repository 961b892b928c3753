use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use lru::LruCache;

/// `(resolved URL, chunk-aligned byte offset)`. Offsets are always exact
/// multiples of the process chunk size.
#[derive(Clone, Hash, Eq, PartialEq, Debug)]
pub struct ChunkKey {
    pub url: Arc<str>,
    pub offset: u64,
}

/// Bounded LRU map from chunk key to bytes. `get`/`put`/`contains` are each
/// atomic with respect to one another; none of them ever call into the
/// fetcher, so no lock here is ever held across I/O.
pub struct BlockCache {
    inner: Mutex<LruCache<ChunkKey, Arc<[u8]>, RandomState>>,
}

impl BlockCache {
    pub fn new(cap_bytes: u64, chunk_size: u64) -> Self {
        let slots = ((cap_bytes / chunk_size.max(1)) as usize).max(1);
        let cap = NonZeroUsize::new(slots).unwrap();
        Self {
            inner: Mutex::new(LruCache::with_hasher(cap, RandomState::default())),
        }
    }

    pub fn get(&self, key: &ChunkKey) -> Option<Arc<[u8]>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: ChunkKey, data: Arc<[u8]>) {
        self.inner.lock().unwrap().put(key, data);
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.inner.lock().unwrap().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.inner.lock().unwrap().cap().get()
    }

    /// Highest chunk-aligned offset resident for `url`, used by the
    /// prefetcher to decide how far ahead it has already filled.
    pub fn highest_cached_offset(&self, url: &str) -> Option<u64> {
        let guard = self.inner.lock().unwrap();
        guard
            .iter()
            .filter(|(key, _)| key.url.as_ref() == url)
            .map(|(key, _)| key.offset)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str, offset: u64) -> ChunkKey {
        ChunkKey {
            url: Arc::from(url),
            offset,
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BlockCache::new(4 * 64, 64);
        for i in 0..4u64 {
            cache.put(key("u", i * 64), Arc::from(&[0u8][..]));
        }
        assert!(cache.contains(&key("u", 0)));
        cache.put(key("u", 4 * 64), Arc::from(&[0u8][..]));
        assert!(!cache.contains(&key("u", 0)));
        assert!(cache.contains(&key("u", 1 * 64)));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn get_counts_as_touch() {
        let cache = BlockCache::new(2 * 64, 64);
        cache.put(key("u", 0), Arc::from(&[0u8][..]));
        cache.put(key("u", 64), Arc::from(&[0u8][..]));
        // Touch offset 0 so it becomes the most-recently-used entry.
        let _ = cache.get(&key("u", 0));
        cache.put(key("u", 128), Arc::from(&[0u8][..]));
        assert!(cache.contains(&key("u", 0)));
        assert!(!cache.contains(&key("u", 64)));
    }

    #[test]
    fn highest_cached_offset_is_scoped_per_url() {
        let cache = BlockCache::new(8 * 64, 64);
        cache.put(key("a", 0), Arc::from(&[0u8][..]));
        cache.put(key("a", 192), Arc::from(&[0u8][..]));
        cache.put(key("b", 320), Arc::from(&[0u8][..]));
        assert_eq!(cache.highest_cached_offset("a"), Some(192));
        assert_eq!(cache.highest_cached_offset("b"), Some(320));
        assert_eq!(cache.highest_cached_offset("c"), None);
    }
}
