// In-memory semantic response cache with bounded capacity
// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::{CacheConfig, CacheEntry, CacheHit, CacheStats, EvictionPolicy, RecentQuery};
use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, error};

/// Cache handle shared between the request controller and the persistence
/// scheduler. The lock is only ever held for synchronous sections, never
/// across an `.await`, so flushes and inserts cannot interleave.
pub type SharedCache = Arc<Mutex<VectorCache>>;

/// Cosine similarity of two vectors, clamped to `[-1.0, 1.0]`.
///
/// Vectors of different length are rejected. A zero-magnitude vector has
/// similarity `0.0` with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(ClientError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Bounded map from entry id to (vector, response, timestamp).
///
/// Owns similarity search and capacity eviction. Persistence is handled
/// elsewhere; nothing in here performs I/O.
pub struct VectorCache {
    entries: LruCache<String, CacheEntry>,
    recent: VecDeque<RecentQuery>,
    dimension: usize,
    /// Offending dimension of the first mismatched vector, if any.
    poisoned: Option<usize>,
    ttl: Option<chrono::Duration>,
    config: CacheConfig,
    stats: CacheStats,
    revision: u64,
}

impl VectorCache {
    /// Create an empty cache whose vectors must all have `dimension` components.
    pub fn new(dimension: usize, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            recent: VecDeque::with_capacity(config.recent_capacity),
            dimension,
            poisoned: None,
            ttl: None,
            config,
            stats: CacheStats::default(),
            revision: 0,
        }
    }

    /// Treat entries older than `ttl` as absent during lookups.
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn into_shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Monotonic counter bumped on every mutation; lets the flusher skip
    /// writes when nothing changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Whether a dimension mismatch has disabled this instance.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn check_dimension(&mut self, actual: usize) -> Result<()> {
        if let Some(bad) = self.poisoned {
            return Err(ClientError::DimensionMismatch {
                expected: self.dimension,
                actual: bad,
            });
        }
        if actual != self.dimension {
            error!(
                "Vector dimension {} does not match cache dimension {}; cache disabled until reinitialized",
                actual, self.dimension
            );
            self.poisoned = Some(actual);
            return Err(ClientError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Find the stored entry most similar to `query`, if it clears the threshold.
    pub fn lookup(&mut self, query: &[f32]) -> Result<Option<CacheHit>> {
        self.lookup_at(query, Utc::now())
    }

    pub fn lookup_at(&mut self, query: &[f32], now: DateTime<Utc>) -> Result<Option<CacheHit>> {
        self.check_dimension(query.len())?;

        let mut best: Option<(&CacheEntry, f32)> = None;
        for (_, entry) in self.entries.iter() {
            if self.ttl.is_some_and(|ttl| entry.is_expired(ttl, now)) {
                continue;
            }
            let similarity = cosine_similarity(query, &entry.vector)?;
            match best {
                Some((_, best_similarity)) if similarity <= best_similarity => {}
                _ => best = Some((entry, similarity)),
            }
        }

        let hit = best
            .filter(|(_, similarity)| *similarity >= self.config.similarity_threshold)
            .map(|(entry, similarity)| CacheHit {
                entry_id: entry.id.clone(),
                response: entry.response.clone(),
                similarity,
            });

        match &hit {
            Some(hit) => {
                debug!("Cache hit: {} (similarity {:.4})", hit.entry_id, hit.similarity);
                self.stats.hits += 1;
                if self.config.eviction_policy == EvictionPolicy::LeastRecentlyUsed {
                    self.entries.promote(&hit.entry_id);
                }
            }
            None => {
                debug!("Cache miss across {} entries", self.entries.len());
                self.stats.misses += 1;
            }
        }

        Ok(hit)
    }

    /// Store a freshly generated response and return its new id.
    pub fn insert(&mut self, prompt: &str, vector: Vec<f32>, response: String) -> Result<String> {
        self.insert_at(prompt, vector, response, Utc::now())
    }

    pub fn insert_at(
        &mut self,
        prompt: &str,
        vector: Vec<f32>,
        response: String,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.check_dimension(vector.len())?;

        let id = uuid::Uuid::new_v4().to_string();
        let entry = CacheEntry {
            id: id.clone(),
            vector,
            response,
            created_at: now,
        };
        self.push_entry(entry);
        self.stats.insertions += 1;

        self.recent.push_front(RecentQuery::new(prompt, &id, now));
        self.recent.truncate(self.config.recent_capacity);

        debug!("Inserted cache entry {} ({} entries)", id, self.entries.len());
        Ok(id)
    }

    /// Re-insert a persisted entry, keeping its id and timestamp.
    ///
    /// Unlike `insert`, a mismatched vector is rejected without disabling
    /// the cache, since stale stored data says nothing about the live
    /// embedding client.
    pub fn restore(&mut self, entry: CacheEntry) -> Result<()> {
        if entry.vector.len() != self.dimension {
            return Err(ClientError::DimensionMismatch {
                expected: self.dimension,
                actual: entry.vector.len(),
            });
        }
        self.push_entry(entry);
        Ok(())
    }

    fn push_entry(&mut self, entry: CacheEntry) {
        let id = entry.id.clone();
        if let Some((evicted_id, _)) = self.entries.push(id.clone(), entry) {
            if evicted_id != id {
                debug!("Evicted cache entry {} to stay within capacity", evicted_id);
                self.stats.evictions += 1;
                crate::metrics::record_cache_eviction();
            }
        }
        self.revision += 1;
        crate::metrics::update_cache_entries(self.entries.len());
    }

    /// Drop every entry created more than `ttl` before `now`.
    pub fn remove_expired(&mut self, ttl: chrono::Duration, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl, now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.entries.pop(id);
        }

        if !expired.is_empty() {
            self.stats.expirations += expired.len() as u64;
            self.revision += 1;
            crate::metrics::update_cache_entries(self.entries.len());
            debug!("Removed {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Empty the cache and the recent-query log.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recent.clear();
        self.revision += 1;
        crate::metrics::update_cache_entries(0);
        debug!("Cache cleared");
    }

    /// Clear everything and accept vectors of a new dimension. The only way
    /// out of the poisoned state.
    pub fn reinitialize(&mut self, dimension: usize) {
        self.clear();
        self.dimension = dimension;
        self.poisoned = None;
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().rev().map(|(_, entry)| entry.clone()).collect()
    }

    /// Most-recent-first insertion log.
    pub fn recent_queries(&self) -> Vec<RecentQuery> {
        self.recent.iter().cloned().collect()
    }
}
