use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::client::ClientPool;
use crate::error::{FsError, Result};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One per registered filename. Created on first registration, lives until
/// process exit.
#[derive(Debug)]
pub struct FileRecord {
    pub canonical_url: Arc<str>,
    resolved_url: Mutex<Option<Arc<str>>>,
    /// `None` until a probe succeeds; once `Some`, never mutated again.
    content_length: Mutex<Option<u64>>,
    last_used: AtomicU64,
}

impl FileRecord {
    fn new(canonical_url: Arc<str>) -> Self {
        Self {
            canonical_url,
            resolved_url: Mutex::new(None),
            content_length: Mutex::new(None),
            last_used: AtomicU64::new(now_secs()),
        }
    }

    fn touch(&self) {
        self.last_used.store(now_secs(), Ordering::Relaxed);
    }
}

/// `filename -> URL` registry, updated at runtime by the control channel and
/// consulted by the FUSE driver and the read assembler.
pub struct Registry {
    files: DashMap<String, Arc<FileRecord>, RandomState>,
    client_pool: Arc<ClientPool>,
}

impl Registry {
    pub fn new(client_pool: Arc<ClientPool>) -> Self {
        Self {
            files: DashMap::with_hasher(RandomState::default()),
            client_pool,
        }
    }

    /// Adds a `filename -> url` mapping. Registering the same filename with
    /// the same URL again is a no-op; registering it with a *different* URL
    /// is rejected (see `DESIGN.md`).
    pub fn register(&self, filename: String, url: String) -> Result<()> {
        match self.files.entry(filename) {
            Entry::Occupied(existing) => {
                if *existing.get().canonical_url != *url {
                    return Err(FsError::Registration(format!(
                        "'{}' is already registered with a different URL",
                        existing.key()
                    )));
                }
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(FileRecord::new(Arc::from(url))));
                Ok(())
            }
        }
    }

    pub fn get(&self, filename: &str) -> Result<Arc<FileRecord>> {
        let record = self
            .files
            .get(filename)
            .map(|r| r.clone())
            .ok_or_else(|| FsError::NotFound(filename.to_string()))?;
        record.touch();
        Ok(record)
    }

    pub fn list(&self) -> Vec<String> {
        self.files.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    /// The post-redirect URL for `record`, resolved once and cached on the
    /// record (and, transitively, in the `ClientPool`).
    pub async fn resolved_url(&self, record: &FileRecord) -> Result<Arc<str>> {
        if let Some(url) = record.resolved_url.lock().unwrap().clone() {
            return Ok(url);
        }
        let resolved = self.client_pool.resolve(&record.canonical_url).await?;
        *record.resolved_url.lock().unwrap() = Some(resolved.clone());
        Ok(resolved)
    }

    /// Content length in bytes, probed via `HEAD` and cached forever once
    /// known. Failures report `0` without negative-caching, so the next call
    /// retries.
    pub async fn content_length(&self, record: &FileRecord) -> u64 {
        if let Some(len) = *record.content_length.lock().unwrap() {
            return len;
        }

        let resolved = match self.resolved_url(record).await {
            Ok(url) => url,
            Err(_) => return 0,
        };
        let client = self.client_pool.get_session(&resolved);

        match client.head(resolved.as_ref()).send().await {
            Ok(resp) if resp.status().is_success() => {
                let len = resp.content_length().unwrap_or(0);
                *record.content_length.lock().unwrap() = Some(len);
                len
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> Registry {
        Registry::new(Arc::new(ClientPool::new(Duration::from_secs(5))))
    }

    #[test]
    fn rejects_redefinition_with_a_different_url() {
        let reg = registry();
        reg.register("movie.mkv".into(), "http://a/1".into()).unwrap();
        reg.register("movie.mkv".into(), "http://a/1".into()).unwrap();
        let err = reg
            .register("movie.mkv".into(), "http://a/2".into())
            .unwrap_err();
        assert!(matches!(err, FsError::Registration(_)));
    }

    #[test]
    fn unregistered_filename_is_not_found() {
        let reg = registry();
        assert!(matches!(reg.get("nope").unwrap_err(), FsError::NotFound(_)));
    }
}
