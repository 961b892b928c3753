use std::future::Future;
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::cache::{BlockCache, ChunkKey};
use crate::error::{FsError, Result};

/// `None` while the leader is still fetching; `Some(Ok(()))` once the chunk
/// landed in the cache, `Some(Err(reason))` if the leader's fetch failed.
///
/// A `watch` channel (not `Notify`) is used deliberately: it always retains
/// its last value, so a follower that subscribes *after* the leader has
/// already finished still observes the outcome instead of racing to miss a
/// one-shot wakeup.
type Outcome = Option<std::result::Result<(), String>>;

/// Deduplicates concurrent misses for the same chunk key. At most one fetch
/// per key is ever outstanding across all callers.
pub struct InFlightTable {
    map: DashMap<ChunkKey, watch::Receiver<Outcome>, RandomState>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve `key` through the cache, coalescing concurrent misses.
    ///
    /// `fetch` is only ever polled by the caller that wins the leader race;
    /// followers never touch it.
    pub async fn get_or_fetch<F>(&self, cache: &BlockCache, key: ChunkKey, fetch: F) -> Result<Arc<[u8]>>
    where
        F: Future<Output = Result<Arc<[u8]>>>,
    {
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }

        enum Role {
            Leader(watch::Sender<Outcome>),
            Follower(watch::Receiver<Outcome>),
        }

        let role = match self.map.entry(key.clone()) {
            Entry::Occupied(existing) => Role::Follower(existing.get().clone()),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Follower(mut rx) => {
                if rx.wait_for(|v| v.is_some()).await.is_err() {
                    return Err(FsError::fetch(&key.url, key.offset, "single-flight leader vanished"));
                }
                cache
                    .get(&key)
                    .ok_or_else(|| FsError::fetch(&key.url, key.offset, "leader fetch failed"))
            }
            Role::Leader(tx) => {
                // Guards against this future being dropped before `fetch`
                // resolves — e.g. a sibling chunk in the same
                // `try_join_all` fails and cancels every other branch. Left
                // unguarded, a cancelled leader would abandon the `DashMap`
                // entry in `Occupied` state forever with a sender that never
                // fires, poisoning the key for every later caller. If the
                // leader runs to completion normally, `tx` is taken before
                // the guard drops and this is a no-op.
                struct LeaderGuard<'a> {
                    map: &'a DashMap<ChunkKey, watch::Receiver<Outcome>, RandomState>,
                    key: &'a ChunkKey,
                    tx: Option<watch::Sender<Outcome>>,
                }
                impl Drop for LeaderGuard<'_> {
                    fn drop(&mut self) {
                        if let Some(tx) = self.tx.take() {
                            let _ = tx.send(Some(Err("leader was cancelled before completing".to_string())));
                            self.map.remove(self.key);
                        }
                    }
                }
                let mut guard = LeaderGuard {
                    map: &self.map,
                    key: &key,
                    tx: Some(tx),
                };

                let result = fetch.await;
                if let Ok(data) = &result {
                    cache.put(key.clone(), data.clone());
                }
                let tx = guard.tx.take().unwrap();
                match &result {
                    Ok(_) => {
                        let _ = tx.send(Some(Ok(())));
                    }
                    Err(e) => {
                        let _ = tx.send(Some(Err(e.to_string())));
                    }
                }
                self.map.remove(&key);
                result
            }
        }
    }
}

impl Default for InFlightTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(offset: u64) -> ChunkKey {
        ChunkKey {
            url: Arc::from("http://example/test"),
            offset,
        }
    }

    #[tokio::test]
    async fn deduplicates_concurrent_misses() {
        let cache = Arc::new(BlockCache::new(4096, 64));
        let inflight = Arc::new(InFlightTable::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let inflight = inflight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                inflight
                    .get_or_fetch(&cache, key(0), async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Arc::from(&b"hello"[..]))
                    })
                    .await
            }));
        }

        for h in handles {
            let data = h.await.unwrap().unwrap();
            assert_eq!(&*data, b"hello");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn leader_failure_propagates_to_followers_without_poisoning_cache() {
        let cache = Arc::new(BlockCache::new(4096, 64));
        let inflight = Arc::new(InFlightTable::new());

        let leader = {
            let cache = cache.clone();
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .get_or_fetch(&cache, key(0), async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(FsError::fetch(&Arc::from("http://example/test"), 0, "boom"))
                    })
                    .await
            })
        };
        let follower = {
            let cache = cache.clone();
            let inflight = inflight.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                inflight
                    .get_or_fetch(&cache, key(0), async { unreachable!("follower must not fetch") })
                    .await
            })
        };

        assert!(leader.await.unwrap().is_err());
        assert!(follower.await.unwrap().is_err());
        assert!(!cache.contains(&key(0)));

        // A later reader is free to retry and succeed.
        let retried = inflight
            .get_or_fetch(&cache, key(0), async { Ok(Arc::from(&b"ok"[..])) })
            .await
            .unwrap();
        assert_eq!(&*retried, b"ok");
    }

    #[tokio::test]
    async fn cancelling_the_leader_does_not_poison_the_key() {
        let cache = Arc::new(BlockCache::new(4096, 64));
        let inflight = Arc::new(InFlightTable::new());

        // Simulates a sibling chunk failing and `try_join_all` dropping this
        // branch mid-fetch: abort the leader's task before its fetch future
        // resolves.
        let leader = {
            let cache = cache.clone();
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .get_or_fetch(&cache, key(0), async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(Arc::from(&b"never"[..]))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();
        let _ = leader.await;

        for _ in 0..50 {
            if inflight.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(inflight.is_empty());

        let retried = inflight
            .get_or_fetch(&cache, key(0), async { Ok(Arc::from(&b"ok"[..])) })
            .await
            .unwrap();
        assert_eq!(&*retried, b"ok");
    }
}
