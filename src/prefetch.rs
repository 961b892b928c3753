use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashSet;

use crate::cache::ChunkKey;
use crate::context::CoreContext;
use crate::fetcher::ChunkFetcher;

/// Tracks which URLs currently have a background fill worker running.
/// Membership in `active` *is* the single-worker-per-URL guarantee:
/// inserting is the only way to become the worker, and `DashSet::insert`
/// is atomic.
pub struct Prefetcher {
    active: DashSet<Arc<str>, RandomState>,
}

impl Prefetcher {
    pub fn new() -> Self {
        Self {
            active: DashSet::with_hasher(RandomState::default()),
        }
    }

    pub fn is_active(&self, url: &str) -> bool {
        self.active.contains(url)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Open-time warmup: fill `[0, min(cache_cap, file_size, open_warmup))`
    /// if chunk 0 isn't already cached and nothing is already filling this
    /// URL.
    pub fn spawn_warmup(ctx: &Arc<CoreContext>, resolved: Arc<str>, file_size: u64) {
        let chunk0 = ChunkKey {
            url: resolved.clone(),
            offset: 0,
        };
        if ctx.cache.contains(&chunk0) {
            return;
        }
        if !ctx.prefetcher.active.insert(resolved.clone()) {
            return;
        }

        let target = ctx
            .config
            .cache_cap_bytes
            .min(file_size)
            .min(ctx.config.open_warmup_bytes);

        let ctx = ctx.clone();
        tokio::spawn(async move {
            run_fill(&ctx, resolved, 0, target).await;
        });
    }

    /// Read-driven lookahead: after a read returns, keep the cache filled up
    /// to `read_end + prefetch_window_bytes`.
    pub fn advise(ctx: &Arc<CoreContext>, resolved: Arc<str>, read_end: u64) {
        let target = read_end.saturating_add(ctx.config.prefetch_window_bytes);
        let next_uncached = ctx
            .cache
            .highest_cached_offset(&resolved)
            .map(|highest| highest + ctx.config.chunk_size)
            .unwrap_or(read_end);

        if next_uncached >= target {
            return;
        }
        if !ctx.prefetcher.active.insert(resolved.clone()) {
            return;
        }

        let ctx = ctx.clone();
        tokio::spawn(async move {
            run_fill(&ctx, resolved, next_uncached, target).await;
        });
    }
}

impl Default for Prefetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker body shared by warmup and lookahead: batches up to
/// `prefetch_batch_size` uncached offsets in `[start, target)`, fetches them
/// concurrently through the single-flight coordinator (so a foreground miss
/// is never duplicated), and repeats until the range is covered or a batch
/// makes no progress. Failures are logged and swallowed — prefetching must
/// never surface an error to a foreground reader.
async fn run_fill(ctx: &Arc<CoreContext>, url: Arc<str>, start: u64, target: u64) {
    let chunk_size = ctx.config.chunk_size;
    let client = ctx.client_pool.get_session(&url);
    let timeout = ctx.config.fetch_timeout;

    let mut cursor = start;
    while cursor < target {
        let mut batch = Vec::with_capacity(ctx.config.prefetch_batch_size);
        while batch.len() < ctx.config.prefetch_batch_size && cursor < target {
            let key = ChunkKey {
                url: url.clone(),
                offset: cursor,
            };
            if !ctx.cache.contains(&key) {
                batch.push(cursor);
            }
            cursor += chunk_size;
        }
        if batch.is_empty() {
            break;
        }

        let fetches = batch.iter().map(|&offset| {
            let client = client.clone();
            let url = url.clone();
            let key = ChunkKey {
                url: url.clone(),
                offset,
            };
            async move {
                ctx.inflight
                    .get_or_fetch(&ctx.cache, key, async move {
                        ChunkFetcher::fetch(&client, &url, offset, chunk_size, timeout)
                            .await
                            .map(|bytes| Arc::from(bytes.as_ref()))
                    })
                    .await
            }
        });

        let results = futures::future::join_all(fetches).await;
        let mut made_progress = false;
        for (offset, result) in batch.iter().zip(results.iter()) {
            match result {
                Ok(_) => made_progress = true,
                Err(e) => tracing::debug!(url = %url, offset, error = %e, "prefetch fetch failed, skipping"),
            }
        }
        if !made_progress {
            break;
        }
    }

    ctx.prefetcher.active.remove(&url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfigBuilder;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    #[tokio::test]
    async fn at_most_one_worker_per_url() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method("GET"))
                .times(0..)
                .respond_with(status_code(206).body(vec![0u8; 16])),
        );

        let config = CoreConfigBuilder::new()
            .chunk_size(16)
            .cache_cap_bytes(16 * 16)
            .prefetch_batch_size(2)
            .build();
        let ctx = CoreContext::new(config);
        let url: Arc<str> = Arc::from(server.url("/f").to_string());

        Prefetcher::spawn_warmup(&ctx, url.clone(), 16 * 16);
        assert!(ctx.prefetcher.is_active(&url));
        // A second warmup attempt for the same URL must be a no-op.
        Prefetcher::spawn_warmup(&ctx, url.clone(), 16 * 16);
        assert_eq!(ctx.prefetcher.active_count(), 1);

        for _ in 0..50 {
            if !ctx.prefetcher.is_active(&url) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!ctx.prefetcher.is_active(&url));
    }
}
