// Generation stream transport
// Author: kelexine (https://github.com/kelexine)

mod http;

pub use http::HttpTransport;

use crate::error::Result;
use crate::protocol::GenerationRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;

/// Raw bytes of one generation response, split at arbitrary points.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens a streaming generation response.
///
/// Each call is one attempt; retries are the controller's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream>;
}
