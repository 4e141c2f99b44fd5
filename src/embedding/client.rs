// HTTP embedding client
// Author: kelexine (https://github.com/kelexine)

use super::{EmbeddingClient, EmbeddingRequest, EmbeddingResponse};
use crate::config::EmbeddingConfig;
use crate::error::{ClientError, Result};
use crate::utils::logging::sanitize;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Embedding client that POSTs `{"text"}` and expects `{"embedding"}` back.
pub struct HttpEmbeddingClient {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Requesting embedding for {} chars", text.chars().count());

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Embedding(format!("HTTP error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Embedding endpoint returned HTTP {}", status);
            return Err(ClientError::Embedding(format!(
                "HTTP {}: {}",
                status,
                sanitize(&body)
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Embedding(format!("Malformed response: {}", e)))?;

        if parsed.embedding.len() != self.dimension {
            return Err(ClientError::Embedding(format!(
                "Expected {} dimensions, got {}",
                self.dimension,
                parsed.embedding.len()
            )));
        }

        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
