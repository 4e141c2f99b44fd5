// Generation service wire protocol
// Author: kelexine (https://github.com/kelexine)
//
// The generation service answers a request with newline-delimited JSON
// objects, each tagged with a `type` discriminator.

pub mod parser;

pub use parser::{decode_stream, StreamEventParser};

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One decoded event from the generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// In-progress reasoning text.
    Thinking { content: String },
    /// Latest complete snapshot of the response text (not a delta).
    Content { full_text: String },
    /// Side effect requested by the model; the controller does not interpret it.
    FunctionCall { name: String, parameters: Value },
    /// Metric map to merge into the running telemetry summary.
    Telemetry { metrics: Map<String, Value> },
    /// Generation finished.
    End,
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::Content { .. } => "content",
            StreamEvent::FunctionCall { .. } => "function_call",
            StreamEvent::Telemetry { .. } => "telemetry",
            StreamEvent::End => "end",
        }
    }

    /// Decode one line of the stream.
    pub fn from_json(line: &str) -> Result<Self> {
        let wire: WireEvent = serde_json::from_str(line)
            .map_err(|e| ClientError::MalformedEvent(format!("invalid JSON: {}", e)))?;
        wire.try_into()
    }

    /// Encode in the wire format, without the trailing newline.
    pub fn to_json(&self) -> String {
        let value = match self {
            StreamEvent::Thinking { content } => {
                serde_json::json!({"type": "thinking", "content": content})
            }
            StreamEvent::Content { full_text } => {
                serde_json::json!({"type": "content", "content": full_text})
            }
            StreamEvent::FunctionCall { name, parameters } => serde_json::json!({
                "type": "function_call",
                "function_call": {"name": name, "parameters": parameters},
            }),
            StreamEvent::Telemetry { metrics } => {
                serde_json::json!({"type": "telemetry", "metrics": metrics})
            }
            StreamEvent::End => serde_json::json!({"type": "end"}),
        };
        value.to_string()
    }
}

/// Loose shape of an event line. Producers disagree on whether function
/// calls are nested and whether metrics live under `metrics` or
/// `telemetry`, so both spellings are accepted.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    event_type: String,
    content: Option<String>,
    function_call: Option<WireFunctionCall>,
    name: Option<String>,
    parameters: Option<Value>,
    metrics: Option<Map<String, Value>>,
    telemetry: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    parameters: Value,
}

impl TryFrom<WireEvent> for StreamEvent {
    type Error = ClientError;

    fn try_from(wire: WireEvent) -> Result<Self> {
        match wire.event_type.as_str() {
            "thinking" => Ok(StreamEvent::Thinking {
                content: wire.content.unwrap_or_default(),
            }),
            "content" => Ok(StreamEvent::Content {
                full_text: wire.content.unwrap_or_default(),
            }),
            "function_call" => {
                let (name, parameters) = match (wire.function_call, wire.name) {
                    (Some(call), _) => (call.name, call.parameters),
                    (None, Some(name)) => (name, wire.parameters.unwrap_or(Value::Null)),
                    (None, None) => {
                        return Err(ClientError::MalformedEvent(
                            "function_call without a name".to_string(),
                        ))
                    }
                };
                Ok(StreamEvent::FunctionCall { name, parameters })
            }
            "telemetry" => Ok(StreamEvent::Telemetry {
                metrics: wire.metrics.or(wire.telemetry).unwrap_or_default(),
            }),
            "end" => Ok(StreamEvent::End),
            other => Err(ClientError::MalformedEvent(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request payload sent when opening a generation stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub message: String,
    /// At most the last 10 turns.
    pub history: Vec<Turn>,
    pub model: String,
    pub thinking_mode: bool,
    pub hybrid_mode: bool,
    pub deep_research: bool,
    pub memory_context: bool,
    /// Capability flags, e.g. `{"web_search": true}`.
    pub tools: BTreeMap<String, bool>,
    pub request_id: String,
    pub max_thinking_tokens: u32,
    pub max_tokens: u32,
}
