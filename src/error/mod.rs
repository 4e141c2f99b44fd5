// Error types for the semantic-stream client
// Author: kelexine (https://github.com/kelexine)

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Malformed event line: {0}")]
    MalformedEvent(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Vector dimension mismatch: cache expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("A request is already in flight for this conversation")]
    Busy,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),
}

impl ClientError {
    /// Whether a failed transport attempt may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Io(_) | ClientError::Http(_) => true,
            ClientError::Upstream { status, .. } => crate::utils::retry::is_retryable(*status),
            _ => false,
        }
    }

    /// Short machine-friendly label, used for metrics and terminal events.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Embedding(_) => "embedding",
            ClientError::Transport(_) | ClientError::Http(_) | ClientError::Io(_) => "transport",
            ClientError::Upstream { .. } => "upstream",
            ClientError::MalformedEvent(_) => "malformed_event",
            ClientError::Persistence(_) => "persistence",
            ClientError::DimensionMismatch { .. } => "dimension_mismatch",
            ClientError::Busy => "busy",
            ClientError::Cancelled => "cancelled",
            ClientError::Timeout(_) => "timeout",
            ClientError::RetriesExhausted { .. } => "retries_exhausted",
            ClientError::Config(_) | ClientError::ConfigParsing(_) => "configuration",
            ClientError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
