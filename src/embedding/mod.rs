// Embedding client module
// Author: kelexine (https://github.com/kelexine)

mod client;

pub use client::HttpEmbeddingClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Turns text into a fixed-length vector.
///
/// Every vector returned by one client has the same length for the life of
/// the process. Failures are reported as [`crate::error::ClientError::Embedding`]
/// and callers treat them as "cache unavailable", never as request failure.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this client produces.
    fn dimension(&self) -> usize;
}

/// Body of the embedding request: `{"text": ...}`.
#[derive(Debug, Serialize)]
pub struct EmbeddingRequest<'a> {
    pub text: &'a str,
}

/// Body of the embedding response: `{"embedding": [...]}`.
#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}
