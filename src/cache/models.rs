//! Cache configuration, entry and statistics models.

// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters of a prompt kept in a [`RecentQuery`].
pub const PROMPT_PREFIX_CHARS: usize = 100;

/// Configuration for the semantic response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether semantic caching is consulted and populated at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of entries held in memory.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Minimum cosine similarity for a lookup to count as a hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Which entry is dropped when the cache is full.
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
    /// Length of the most-recent-first query log.
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

impl Default for CacheConfig {
    /// - `enabled`: true
    /// - `capacity`: 1000
    /// - `similarity_threshold`: 0.85
    /// - `eviction_policy`: insertion order
    /// - `recent_capacity`: 20
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            similarity_threshold: default_similarity_threshold(),
            eviction_policy: EvictionPolicy::default(),
            recent_capacity: default_recent_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    1000
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_recent_capacity() -> usize {
    20
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Oldest inserted entry goes first; hits do not refresh an entry.
    #[default]
    InsertionOrder,
    /// Entries are refreshed on every hit.
    LeastRecentlyUsed,
}

/// A cached response keyed by the embedding of the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry has outlived `ttl` as of `now`.
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.created_at + ttl <= now
    }
}

/// Diagnostic record of a recent insertion. Never used for lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentQuery {
    pub prompt_prefix: String,
    pub cache_id: String,
    pub timestamp: DateTime<Utc>,
}

impl RecentQuery {
    pub fn new(prompt: &str, cache_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            prompt_prefix: prompt.chars().take(PROMPT_PREFIX_CHARS).collect(),
            cache_id: cache_id.to_string(),
            timestamp,
        }
    }
}

/// Result of a successful semantic lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub entry_id: String,
    pub response: String,
    pub similarity: f32,
}

/// Statistics for cache operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a match.
    pub hits: u64,
    /// Lookups that found nothing above the threshold.
    pub misses: u64,
    /// Entries added through `insert`.
    pub insertions: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Entries dropped by TTL cleanup.
    pub expirations: u64,
}
