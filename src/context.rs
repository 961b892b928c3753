use std::sync::Arc;

use crate::cache::BlockCache;
use crate::client::{self, ClientPool};
use crate::config::CoreConfig;
use crate::inflight::InFlightTable;
use crate::prefetch::Prefetcher;
use crate::registry::Registry;

/// The process-wide mutable state, bundled into one explicitly constructed
/// value rather than scattered singletons. Tests
/// build fresh contexts freely; nothing here is global.
pub struct CoreContext {
    pub config: CoreConfig,
    pub registry: Registry,
    pub client_pool: Arc<ClientPool>,
    pub cache: BlockCache,
    pub inflight: InFlightTable,
    pub prefetcher: Prefetcher,
}

impl CoreContext {
    pub fn new(config: CoreConfig) -> Arc<Self> {
        let client_pool = Arc::new(ClientPool::new(config.fetch_timeout));
        let registry = Registry::new(client_pool.clone());
        let cache = BlockCache::new(config.cache_cap_bytes, config.chunk_size);

        Arc::new(Self {
            cache,
            inflight: InFlightTable::new(),
            prefetcher: Prefetcher::new(),
            registry,
            client_pool,
            config,
        })
    }

    /// Spawns the long-lived background workers that accompany a core
    /// context: currently just the idle-session sweeper. Prefetch workers
    /// are spawned on demand, not here.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![client::spawn_sweeper(
            self.client_pool.clone(),
            self.config.session_sweep_period,
            self.config.idle_session_timeout,
        )]
    }
}
