use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tsl_types::{Result, TslError};

use super::embedded;

/// Stylesheet bytes keyed by a tagged reference (`file:<path>` or
/// `embedded:<name>`).
///
/// Hits share a read lock. A miss loads under the write lock, so each key is
/// loaded once until [`clear`](StylesheetCache::clear) drops every entry.
#[derive(Debug, Default)]
pub struct StylesheetCache {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
    loads: AtomicUsize,
}

/// Cache key for a transform reference.
pub fn cache_key(reference: &str) -> String {
    if embedded::is_embedded_path(reference) {
        embedded::path(embedded::extract_name(reference))
    } else {
        format!("file:{reference}")
    }
}

impl StylesheetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached bytes for `key`, running `loader` on a miss. Loader
    /// errors are returned as-is and nothing is cached.
    pub async fn get_or_load<F>(&self, key: &str, loader: F) -> Result<Arc<[u8]>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(hit) = self.entries.read().await.get(key) {
            return Ok(Arc::clone(hit));
        }

        let mut entries = self.entries.write().await;
        if let Some(hit) = entries.get(key) {
            return Ok(Arc::clone(hit));
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        let bytes: Arc<[u8]> = loader()?.into();
        entries.insert(key.to_string(), Arc::clone(&bytes));
        tracing::debug!(key = %key, size = bytes.len(), "Cached stylesheet");
        Ok(bytes)
    }

    /// Load a transform reference: `embedded:<name>` or a filesystem path.
    pub async fn load(&self, reference: &str) -> Result<Arc<[u8]>> {
        let key = cache_key(reference);
        if embedded::is_embedded_path(reference) {
            let name = embedded::extract_name(reference);
            self.get_or_load(&key, || {
                embedded::get(name)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| TslError::StylesheetNotFound(reference.to_string()))
            })
            .await
        } else {
            self.get_or_load(&key, || {
                std::fs::read(reference).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        TslError::StylesheetNotFound(reference.to_string())
                    }
                    _ => TslError::Io(e),
                })
            })
            .await
        }
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// How many times a loader has run (cache misses that loaded).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}
