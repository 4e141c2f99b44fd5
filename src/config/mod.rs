// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{ClientError, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use std::time::Duration;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file (`path`, or `~/.semantic-stream/config.toml`)
    /// 3. Defaults (lowest)
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_config_path(), false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(required),
            )
            // Override with environment variables, e.g.
            // SEMANTIC_STREAM_CACHE__SIMILARITY_THRESHOLD=0.9
            .add_source(
                Environment::with_prefix("SEMANTIC_STREAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.generation.max_retries == 0 {
            return Err(ClientError::Config(
                "generation.max_retries must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ClientError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ClientError::Config(
                "cache.capacity must be positive".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(ClientError::Config(
                "cache.similarity_threshold must be within [-1, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        app_home().join("config.toml")
    }
}

impl GenerationConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl PersistenceConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}
