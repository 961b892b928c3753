use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{FsError, Result};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct SessionEntry {
    client: reqwest::Client,
    last_used: AtomicU64,
}

/// Per-origin persistent connection reuse plus memoized redirect resolution.
///
/// A "session" here is a handle into `reqwest`'s own internal connection
/// pool rather than a raw socket: `reqwest::Client` is a cheap,
/// reference-counted clone, so evicting a `SessionEntry` from the table never
/// interrupts a fetch already holding a cloned client.
pub struct ClientPool {
    shared: reqwest::Client,
    sessions: DashMap<String, SessionEntry, RandomState>,
    resolved: DashMap<String, Arc<str>, RandomState>,
}

impl ClientPool {
    pub fn new(connect_timeout: Duration) -> Self {
        let shared = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            shared,
            sessions: DashMap::with_hasher(RandomState::default()),
            resolved: DashMap::with_hasher(RandomState::default()),
        }
    }

    /// Returns a session for the canonical URL, creating one on first use
    /// and refreshing its last-used timestamp. The session table is keyed
    /// by canonical URL, shared across all readers of it.
    pub fn get_session(&self, url: &str) -> reqwest::Client {
        let now = now_secs();
        let entry = self.sessions.entry(url.to_string()).or_insert_with(|| SessionEntry {
            client: self.shared.clone(),
            last_used: AtomicU64::new(now),
        });
        entry.last_used.store(now, Ordering::Relaxed);
        entry.client.clone()
    }

    /// Returns the post-redirect authoritative URL, memoized per canonical
    /// URL after the first `HEAD`.
    pub async fn resolve(&self, url: &str) -> Result<Arc<str>> {
        if let Some(cached) = self.resolved.get(url) {
            return Ok(cached.clone());
        }

        let client = self.get_session(url);
        let resp = client
            .head(url)
            .send()
            .await
            .map_err(|e| FsError::Fetch {
                url: Arc::from(url),
                offset: 0,
                reason: e.to_string(),
            })?;

        let resolved: Arc<str> = Arc::from(resp.url().as_str());
        match self.resolved.entry(url.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(resolved.clone());
                Ok(resolved)
            }
        }
    }

    /// Drops sessions (and their resolved-URL entries) idle past `idle_timeout`.
    pub fn sweep_idle(&self, idle_timeout: Duration) {
        let now = now_secs();
        let cutoff = idle_timeout.as_secs();
        let mut evicted = Vec::new();
        self.sessions.retain(|key, entry| {
            let idle = now.saturating_sub(entry.last_used.load(Ordering::Relaxed));
            let keep = idle < cutoff;
            if !keep {
                evicted.push(key.clone());
            }
            keep
        });
        for key in evicted {
            self.resolved.remove(&key);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Spawns the periodic idle-session sweeper.
pub fn spawn_sweeper(
    pool: Arc<ClientPool>,
    period: Duration,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            pool.sweep_idle(idle_timeout);
        }
    })
}
