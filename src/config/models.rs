//! Configuration data structures for the semantic streaming client.
//!
//! This module defines the schema for the application settings: the
//! generation endpoint and request options, the embedding service, the
//! semantic cache, cache persistence and logging.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Streaming generation service and per-request options.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Embedding service used for cache lookups.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Semantic response cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Durable storage of the cache between runs.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the streaming generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// URL the request payload is POSTed to.
    /// Default: `http://127.0.0.1:8080/v1/chat/stream`
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// Bearer token sent with each request, if any.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name forwarded in the request payload.
    /// Default: `default`
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub thinking_mode: bool,

    #[serde(default)]
    pub hybrid_mode: bool,

    #[serde(default)]
    pub deep_research: bool,

    #[serde(default)]
    pub memory_context: bool,

    /// Capability flags forwarded as-is, e.g. `web_search = true`.
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,

    /// Default: `1024`
    #[serde(default = "default_max_thinking_tokens")]
    pub max_thinking_tokens: u32,

    /// Default: `4096`
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Total transport attempts per request, including the first.
    /// Default: `3`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on each further retry.
    /// Default: `1000`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum duration of the streaming phase of one request.
    /// Default: `300` (5 minutes)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

/// Settings for the embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Default: `http://127.0.0.1:8080/v1/embed`
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Vector length; fixed for the lifetime of the process.
    /// Default: `1536`
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Default: `10`
    #[serde(default = "default_embedding_timeout")]
    pub timeout_seconds: u64,
}

/// Settings for persisting the cache to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the store files.
    /// Default: `~/.semantic-stream/store`
    #[serde(default = "default_store_directory")]
    pub directory: String,

    /// Key the whole serialized cache is stored under.
    /// Default: `semantic_cache`
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Entries older than this are dropped on load and by cleanup.
    /// Default: `86400` (24 hours)
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// Default: `60`
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,

    /// Default: `3600` (1 hour)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `warn`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key: None,
            model: default_model(),
            thinking_mode: false,
            hybrid_mode: false,
            deep_research: false,
            memory_context: false,
            tools: BTreeMap::new(),
            max_thinking_tokens: default_max_thinking_tokens(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            api_key: None,
            dimension: default_dimension(),
            timeout_seconds: default_embedding_timeout(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_store_directory(),
            storage_key: default_storage_key(),
            ttl_seconds: default_ttl(),
            flush_interval_seconds: default_flush_interval(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Base directory for the config file and the store.
pub fn app_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".semantic-stream")
}

// Helper functions for serde defaults
fn default_generation_endpoint() -> String {
    "http://127.0.0.1:8080/v1/chat/stream".to_string()
}

fn default_embedding_endpoint() -> String {
    "http://127.0.0.1:8080/v1/embed".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_max_thinking_tokens() -> u32 {
    1024
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    300
}

fn default_dimension() -> usize {
    1536
}

fn default_embedding_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_store_directory() -> String {
    app_home().join("store").to_string_lossy().to_string()
}

fn default_storage_key() -> String {
    "semantic_cache".to_string()
}

fn default_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_flush_interval() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
