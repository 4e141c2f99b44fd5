// Durable key-value stores
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Minimal async key-value store holding opaque blobs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process store. Used by tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// One file per key inside a directory.
///
/// File names are the hex SHA-256 of the key, so arbitrary keys are safe.
/// Writes go to a temporary sibling first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.directory.join(format!("{}.bin", hex::encode(digest)))
    }
}

fn persistence_error(action: &str, path: &Path, e: std::io::Error) -> ClientError {
    ClientError::Persistence(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence_error("read", &path, e)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| persistence_error("create", &self.directory, e))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("bin.tmp");

        tokio::fs::write(&tmp_path, value)
            .await
            .map_err(|e| persistence_error("write", &tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| persistence_error("rename", &path, e))?;

        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence_error("delete", &path, e)),
        }
    }
}
