use std::time::Duration;

/// Process-wide tunables.
///
/// These are genuinely process-wide, not per-filesystem: every registered
/// URL shares one cache, one in-flight table, and one session sweep
/// cadence.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub chunk_size: u64,
    pub cache_cap_bytes: u64,
    pub prefetch_window_bytes: u64,
    pub prefetch_batch_size: usize,
    pub open_warmup_bytes: u64,
    pub idle_session_timeout: Duration,
    pub session_sweep_period: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2 * 1024 * 1024,
            cache_cap_bytes: 200 * 1024 * 1024,
            prefetch_window_bytes: 100 * 1024 * 1024,
            prefetch_batch_size: 8,
            open_warmup_bytes: 10 * 1024 * 1024,
            idle_session_timeout: Duration::from_secs(300),
            session_sweep_period: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(60),
        }
    }
}

impl CoreConfig {
    /// Number of resident chunk slots the block cache should hold.
    pub fn cache_slots(&self) -> usize {
        ((self.cache_cap_bytes / self.chunk_size.max(1)) as usize).max(1)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.chunk_size = bytes.max(1);
        self
    }

    pub fn cache_cap_bytes(mut self, bytes: u64) -> Self {
        self.config.cache_cap_bytes = bytes.max(1);
        self
    }

    pub fn prefetch_window_bytes(mut self, bytes: u64) -> Self {
        self.config.prefetch_window_bytes = bytes;
        self
    }

    pub fn prefetch_batch_size(mut self, n: usize) -> Self {
        self.config.prefetch_batch_size = n.max(1);
        self
    }

    pub fn open_warmup_bytes(mut self, bytes: u64) -> Self {
        self.config.open_warmup_bytes = bytes;
        self
    }

    pub fn idle_session_timeout(mut self, d: Duration) -> Self {
        self.config.idle_session_timeout = d;
        self
    }

    pub fn session_sweep_period(mut self, d: Duration) -> Self {
        self.config.session_sweep_period = d;
        self
    }

    pub fn fetch_timeout(mut self, d: Duration) -> Self {
        self.config.fetch_timeout = d;
        self
    }

    pub fn build(self) -> CoreConfig {
        self.config
    }
}
