// Cache persistence: load, flush and TTL cleanup
// Author: kelexine (https://github.com/kelexine)

use super::store::KeyValueStore;
use crate::cache::{CacheEntry, SharedCache};
use crate::config::PersistenceConfig;
use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

/// Serialized form of the whole cache under a single key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedCache<T> {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<T>,
}

/// What a flush wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub entries: usize,
    /// Cache revision the snapshot was taken at.
    pub revision: u64,
}

/// What a TTL cleanup pass removed and then wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub removed: usize,
    pub flushed: FlushOutcome,
}

/// Moves cache contents between memory and a durable store.
///
/// All failures here are local: callers log them and keep serving from
/// memory.
pub struct PersistenceManager {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: chrono::Duration,
}

impl PersistenceManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &PersistenceConfig) -> Self {
        Self {
            store,
            key: config.storage_key.clone(),
            ttl: chrono::Duration::seconds(config.ttl_seconds as i64),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Read persisted entries, dropping expired and malformed ones.
    pub async fn load(&self) -> Vec<CacheEntry> {
        self.load_at(Utc::now()).await
    }

    pub async fn load_at(&self, now: DateTime<Utc>) -> Vec<CacheEntry> {
        let bytes = match self.store.get(&self.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No persisted cache under key {}", self.key);
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to read persisted cache, continuing in memory only: {}", e);
                crate::metrics::record_persistence("load", false);
                return Vec::new();
            }
        };

        let persisted: PersistedCache<Value> = match serde_json::from_slice(&bytes) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Discarding unreadable persisted cache: {}", e);
                crate::metrics::record_persistence("load", false);
                return Vec::new();
            }
        };

        if persisted.version != FORMAT_VERSION {
            warn!(
                "Discarding persisted cache with unsupported version {}",
                persisted.version
            );
            return Vec::new();
        }

        let total = persisted.entries.len();
        let mut entries: Vec<CacheEntry> = persisted
            .entries
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<CacheEntry>(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Dropping malformed persisted entry: {}", e);
                    None
                }
            })
            .filter(|entry| !entry.is_expired(self.ttl, now))
            .collect();
        entries.sort_by_key(|entry| entry.created_at);

        info!(
            "Loaded {} of {} persisted cache entries",
            entries.len(),
            total
        );
        crate::metrics::record_persistence("load", true);
        entries
    }

    /// Serialize `entries` to the store, replacing what was there.
    pub async fn flush(&self, entries: &[CacheEntry]) -> Result<()> {
        let persisted = PersistedCache {
            version: FORMAT_VERSION,
            saved_at: Utc::now(),
            entries: entries.to_vec(),
        };
        let bytes = serde_json::to_vec(&persisted)?;

        let result = self.store.set(&self.key, &bytes).await;
        crate::metrics::record_persistence("flush", result.is_ok());
        result?;

        debug!("Flushed {} cache entries ({} bytes)", entries.len(), bytes.len());
        Ok(())
    }

    /// Snapshot the cache under its lock, then write outside of it.
    pub async fn flush_cache(&self, cache: &SharedCache) -> Result<FlushOutcome> {
        let (entries, revision) = {
            let guard = cache.lock();
            (guard.entries(), guard.revision())
        };
        self.flush(&entries).await?;
        Ok(FlushOutcome {
            entries: entries.len(),
            revision,
        })
    }

    /// Load persisted entries into `cache`, oldest first. Entries whose
    /// dimension does not match the cache are dropped.
    pub async fn restore_into(&self, cache: &SharedCache) -> usize {
        let entries = self.load().await;
        let mut guard = cache.lock();
        let mut restored = 0;
        for entry in entries {
            match guard.restore(entry) {
                Ok(()) => restored += 1,
                Err(e) => debug!("Skipping persisted entry: {}", e),
            }
        }
        restored
    }

    /// Drop entries older than the TTL from memory and rewrite the store.
    /// Independent of capacity eviction.
    pub async fn cleanup(&self, cache: &SharedCache) -> Result<CleanupOutcome> {
        self.cleanup_at(cache, Utc::now()).await
    }

    pub async fn cleanup_at(
        &self,
        cache: &SharedCache,
        now: DateTime<Utc>,
    ) -> Result<CleanupOutcome> {
        let removed = cache.lock().remove_expired(self.ttl, now);
        let result = self.flush_cache(cache).await;
        crate::metrics::record_persistence("cleanup", result.is_ok());
        let flushed = result?;

        if removed > 0 {
            info!("Cleanup removed {} expired cache entries", removed);
        }
        Ok(CleanupOutcome { removed, flushed })
    }

    /// Remove the persisted blob entirely.
    pub async fn clear(&self) -> Result<()> {
        let result = self.store.delete(&self.key).await;
        crate::metrics::record_persistence("clear", result.is_ok());
        result.map_err(|e| match e {
            ClientError::Persistence(_) => e,
            other => ClientError::Persistence(other.to_string()),
        })
    }
}
