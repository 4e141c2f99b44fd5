// Shared fakes for integration tests
// Author: kelexine (https://github.com/kelexine)

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use semantic_stream::cache::{CacheConfig, SharedCache, VectorCache};
use semantic_stream::controller::{
    ControllerConfig, ControllerEvent, FunctionCallHandler, StreamingRequestController,
};
use semantic_stream::embedding::EmbeddingClient;
use semantic_stream::error::{ClientError, Result};
use semantic_stream::protocol::GenerationRequest;
use semantic_stream::transport::{ByteStream, Transport};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

pub const DIMENSION: usize = 64;

/// Bag-of-words embedder: each lowercase word adds 1.0 to a hashed bucket.
/// Identical prompts embed identically.
#[derive(Default)]
pub struct HashEmbedder {
    pub fail: AtomicBool,
    /// Never answer, like a service that accepted the call and went quiet.
    pub hang: AtomicBool,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }
}

pub fn embed_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    for word in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        vector[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Embedding("embedding service down".to_string()));
        }
        Ok(embed_words(text))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// One piece of a scripted response body.
#[derive(Clone)]
pub enum Step {
    Chunk(String),
    /// Stall until the gate is notified.
    Wait(Arc<Notify>),
    /// Connection reset mid-stream.
    Reset,
}

/// What one `open` call does.
#[derive(Clone)]
pub enum Script {
    Refuse(u16),
    /// `open` never returns: the server accepted the connection but sends no headers.
    Hang,
    Body(Vec<Step>),
}

/// Transport that replays scripted responses, one per `open`.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedTransport {
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let script = self.scripts.lock().pop_front();
        let steps = match script {
            Some(Script::Body(steps)) => steps,
            Some(Script::Hang) => return std::future::pending().await,
            Some(Script::Refuse(status)) => {
                return Err(ClientError::Upstream {
                    status,
                    body: "scripted refusal".to_string(),
                })
            }
            None => return Err(ClientError::Transport("no script left".to_string())),
        };

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(text) => yield Ok(Bytes::from(text)),
                    Step::Wait(gate) => gate.notified().await,
                    Step::Reset => {
                        yield Err(ClientError::Transport("connection reset".to_string()));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Records every function call it receives.
#[derive(Default)]
pub struct RecordingHandler {
    pub calls: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl FunctionCallHandler for RecordingHandler {
    async fn handle(&self, _request_id: &str, name: &str, parameters: &Value) -> Result<()> {
        self.calls.lock().push((name.to_string(), parameters.clone()));
        Ok(())
    }
}

pub fn thinking(content: &str) -> String {
    format!("{}\n", serde_json::json!({"type": "thinking", "content": content}))
}

pub fn content(text: &str) -> String {
    format!("{}\n", serde_json::json!({"type": "content", "content": text}))
}

pub fn end() -> String {
    "{\"type\":\"end\"}\n".to_string()
}

/// A well-formed response: one thinking line, growing content, end.
pub fn answer(text: &str) -> Script {
    let half: String = text.chars().take(text.chars().count() / 2).collect();
    Script::Body(vec![
        Step::Chunk(thinking("considering")),
        Step::Chunk(content(&half)),
        Step::Chunk(content(text)),
        Step::Chunk(end()),
    ])
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        base_delay: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
        ..ControllerConfig::default()
    }
}

pub struct Harness {
    pub controller: Arc<StreamingRequestController>,
    pub cache: SharedCache,
    pub embedder: Arc<HashEmbedder>,
    pub transport: Arc<ScriptedTransport>,
    pub handler: Arc<RecordingHandler>,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        let cache = VectorCache::new(DIMENSION, CacheConfig::default()).into_shared();
        let embedder = Arc::new(HashEmbedder::default());
        let transport = Arc::new(ScriptedTransport::default());
        let handler = Arc::new(RecordingHandler::default());
        let controller = Arc::new(StreamingRequestController::new(
            config,
            cache.clone(),
            embedder.clone(),
            transport.clone(),
            handler.clone(),
        ));
        Self {
            controller,
            cache,
            embedder,
            transport,
            handler,
        }
    }
}

/// Everything already published on the channel.
pub fn drain(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

/// Poll `condition` every few milliseconds, for at most two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
