// Typed events published by the request controller
// Author: kelexine (https://github.com/kelexine)

use super::state::RequestState;
use crate::error::Result;
use crate::telemetry::TelemetrySnapshot;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Everything an observer can learn about a request, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged {
        request_id: String,
        state: RequestState,
    },
    CacheHit {
        request_id: String,
        similarity: f32,
    },
    /// In-progress reasoning text.
    Thinking {
        request_id: String,
        content: String,
    },
    /// Latest full response text, replacing any earlier one.
    Content {
        request_id: String,
        full_text: String,
    },
    FunctionCall {
        request_id: String,
        name: String,
        parameters: Value,
    },
    Telemetry {
        request_id: String,
        snapshot: TelemetrySnapshot,
    },
    /// A transport attempt failed and another follows after `delay`.
    Retrying {
        request_id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Completed {
        request_id: String,
        response: String,
        from_cache: bool,
    },
    /// The single terminal error for a failed request.
    Failed {
        request_id: String,
        error: String,
    },
    Cancelled {
        request_id: String,
    },
}

impl ControllerEvent {
    pub fn request_id(&self) -> &str {
        match self {
            ControllerEvent::StateChanged { request_id, .. }
            | ControllerEvent::CacheHit { request_id, .. }
            | ControllerEvent::Thinking { request_id, .. }
            | ControllerEvent::Content { request_id, .. }
            | ControllerEvent::FunctionCall { request_id, .. }
            | ControllerEvent::Telemetry { request_id, .. }
            | ControllerEvent::Retrying { request_id, .. }
            | ControllerEvent::Completed { request_id, .. }
            | ControllerEvent::Failed { request_id, .. }
            | ControllerEvent::Cancelled { request_id } => request_id,
        }
    }
}

/// Receives `function_call` events. The controller forwards them as-is and
/// never interprets them; a handler error is logged and the stream goes on.
#[async_trait]
pub trait FunctionCallHandler: Send + Sync {
    async fn handle(&self, request_id: &str, name: &str, parameters: &Value) -> Result<()>;
}

/// Handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFunctionCallHandler;

#[async_trait]
impl FunctionCallHandler for NoopFunctionCallHandler {
    async fn handle(&self, request_id: &str, name: &str, _parameters: &Value) -> Result<()> {
        debug!("Ignoring function call {} for request {}", name, request_id);
        Ok(())
    }
}
