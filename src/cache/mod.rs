// Semantic response cache module
// Author: kelexine (https://github.com/kelexine)

pub mod models;
pub mod vector;

pub use models::{CacheConfig, CacheEntry, CacheHit, CacheStats, EvictionPolicy, RecentQuery};
pub use vector::{cosine_similarity, SharedCache, VectorCache};
