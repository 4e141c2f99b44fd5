// HTTP streaming transport for the generation service
// Author: kelexine (https://github.com/kelexine)

use super::{ByteStream, Transport};
use crate::config::GenerationConfig;
use crate::error::{ClientError, Result};
use crate::protocol::GenerationRequest;
use crate::utils::logging::sanitize;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

/// POSTs the request payload and exposes the response body as a byte stream.
pub struct HttpTransport {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        // No overall timeout here: streams are long-lived and the controller
        // enforces its own deadline.
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created streaming HTTP client for {}", config.endpoint);

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream> {
        debug!(
            "Opening generation stream to {} (request {})",
            self.endpoint, request.request_id
        );

        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header("Accept", "application/x-ndjson")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("HTTP error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = sanitize(&response.text().await.unwrap_or_default());
            error!("Generation service error: HTTP {} - {}", status, body);
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::Transport(format!("Stream read failed: {}", e))));

        Ok(Box::pin(byte_stream))
    }
}
