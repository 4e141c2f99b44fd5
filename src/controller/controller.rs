// Streaming request controller: cache check, streaming, retry and cancellation
// Author: kelexine (https://github.com/kelexine)

use super::events::{ControllerEvent, FunctionCallHandler};
use super::state::{record_exchange, ControlSignal, RequestContext, RequestState};
use crate::cache::{CacheHit, SharedCache};
use crate::config::AppConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{ClientError, Result};
use crate::protocol::{decode_stream, GenerationRequest, StreamEvent, Turn};
use crate::telemetry::{TelemetryAggregator, TelemetrySnapshot};
use crate::transport::Transport;
use crate::utils::retry::RetrySchedule;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-controller settings, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub model: String,
    pub thinking_mode: bool,
    pub hybrid_mode: bool,
    pub deep_research: bool,
    pub memory_context: bool,
    pub tools: BTreeMap<String, bool>,
    pub max_thinking_tokens: u32,
    pub max_tokens: u32,
    /// Total transport attempts per request.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Wall-clock bound on the streaming phase, retries and backoff included.
    ///
    /// Time spent paused counts against it: a request paused for longer than
    /// this fails with `Timeout` rather than holding the conversation's
    /// single-flight slot indefinitely.
    pub timeout: Duration,
    /// Consult and populate the semantic cache.
    pub cache_enabled: bool,
}

impl From<&AppConfig> for ControllerConfig {
    fn from(config: &AppConfig) -> Self {
        let generation = &config.generation;
        Self {
            model: generation.model.clone(),
            thinking_mode: generation.thinking_mode,
            hybrid_mode: generation.hybrid_mode,
            deep_research: generation.deep_research,
            memory_context: generation.memory_context,
            tools: generation.tools.clone(),
            max_thinking_tokens: generation.max_thinking_tokens,
            max_tokens: generation.max_tokens,
            max_retries: generation.max_retries.max(1),
            base_delay: generation.base_delay(),
            timeout: generation.timeout(),
            cache_enabled: config.cache.enabled,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub request_id: String,
    pub response: String,
    pub from_cache: bool,
    /// Similarity of the matching entry when served from the cache.
    pub similarity: Option<f32>,
    /// Transport attempts made; 0 for a cache hit.
    pub attempts: u32,
    pub telemetry: TelemetrySnapshot,
}

struct ActiveRequest {
    request_id: String,
    control: watch::Sender<ControlSignal>,
}

/// Releases the single-flight slot when the request ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveRequest>>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

/// Drives one logical request at a time for a conversation.
///
/// Callers share it behind an `Arc`: one task awaits [`submit`], others may
/// [`pause`], [`resume`] or [`cancel`] it, and any number of observers
/// [`subscribe`] to its events.
///
/// [`submit`]: StreamingRequestController::submit
/// [`pause`]: StreamingRequestController::pause
/// [`resume`]: StreamingRequestController::resume
/// [`cancel`]: StreamingRequestController::cancel
/// [`subscribe`]: StreamingRequestController::subscribe
pub struct StreamingRequestController {
    config: ControllerConfig,
    cache: SharedCache,
    embedder: Arc<dyn EmbeddingClient>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn FunctionCallHandler>,
    events: broadcast::Sender<ControllerEvent>,
    state: Mutex<RequestState>,
    active: Mutex<Option<ActiveRequest>>,
    history: Mutex<VecDeque<Turn>>,
}

impl StreamingRequestController {
    pub fn new(
        config: ControllerConfig,
        cache: SharedCache,
        embedder: Arc<dyn EmbeddingClient>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn FunctionCallHandler>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            cache,
            embedder,
            transport,
            handler,
            events,
            state: Mutex::new(RequestState::Idle),
            active: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// State of the current request, or of the last one once it ended.
    pub fn state(&self) -> RequestState {
        *self.state.lock()
    }

    /// Conversation turns sent with the next request, oldest first.
    pub fn history(&self) -> Vec<Turn> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Id of the request in flight, if any.
    pub fn active_request(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.request_id.clone())
    }

    /// Stop consuming the stream until [`resume`](Self::resume).
    /// Returns false when nothing is in flight.
    pub fn pause(&self) -> bool {
        self.signal(|s| s.paused = true)
    }

    pub fn resume(&self) -> bool {
        self.signal(|s| s.paused = false)
    }

    /// Abort the request at its next suspension point. Partial output is
    /// discarded and never cached.
    pub fn cancel(&self) -> bool {
        self.signal(|s| s.cancelled = true)
    }

    fn signal(&self, modify: impl FnOnce(&mut ControlSignal)) -> bool {
        match self.active.lock().as_ref() {
            Some(active) => {
                active.control.send_modify(modify);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, ctx: &RequestContext, state: RequestState) {
        *self.state.lock() = state;
        debug!("Request {} -> {}", ctx.request_id, state);
        self.emit(ControllerEvent::StateChanged {
            request_id: ctx.request_id.clone(),
            state,
        });
    }

    /// Claim the single-flight slot or fail with `Busy`.
    fn begin(&self, prompt: &str) -> Result<(ActiveGuard<'_>, RequestContext)> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            warn!(
                "Rejecting new request while {} is in flight",
                current.request_id
            );
            crate::metrics::record_request("busy", 0.0);
            return Err(ClientError::Busy);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (control, receiver) = watch::channel(ControlSignal::default());
        *active = Some(ActiveRequest {
            request_id: request_id.clone(),
            control,
        });
        drop(active);

        let ctx = RequestContext::new(request_id, prompt, self.history(), receiver);
        Ok((ActiveGuard { slot: &self.active }, ctx))
    }

    /// Run one logical request to completion.
    ///
    /// Returns `Busy` immediately if another request is in flight. Every
    /// other failure is reported once, both here and as a terminal event.
    /// The single-flight slot is released before terminal events go out, so
    /// an observer may submit the next request as soon as it sees one.
    pub async fn submit(&self, prompt: &str) -> Result<RequestOutcome> {
        let (guard, mut ctx) = self.begin(prompt)?;
        info!("Request {} started", ctx.request_id);

        let mut telemetry = TelemetryAggregator::new(ctx.start_time);
        let result = self.run(&mut ctx, &mut telemetry).await;
        let elapsed = ctx.start_time.elapsed().as_secs_f64();

        let terminal = match &result {
            Ok(outcome) => {
                record_exchange(&mut self.history.lock(), &ctx.prompt, &outcome.response);
                RequestState::Completed
            }
            Err(ClientError::Cancelled) => RequestState::Cancelled,
            Err(_) => RequestState::Failed,
        };
        *self.state.lock() = terminal;
        drop(guard);

        debug!("Request {} -> {}", ctx.request_id, terminal);
        self.emit(ControllerEvent::StateChanged {
            request_id: ctx.request_id.clone(),
            state: terminal,
        });

        match result {
            Ok(outcome) => {
                let label = if outcome.from_cache { "cache_hit" } else { "completed" };
                crate::metrics::record_request(label, elapsed);
                self.emit(ControllerEvent::Completed {
                    request_id: ctx.request_id.clone(),
                    response: outcome.response.clone(),
                    from_cache: outcome.from_cache,
                });
                info!(
                    "Request {} completed ({}, {} attempts)",
                    ctx.request_id,
                    if outcome.from_cache { "cache" } else { "stream" },
                    outcome.attempts
                );
                Ok(outcome)
            }
            Err(ClientError::Cancelled) => {
                crate::metrics::record_request("cancelled", elapsed);
                self.emit(ControllerEvent::Cancelled {
                    request_id: ctx.request_id.clone(),
                });
                info!("Request {} cancelled", ctx.request_id);
                Err(ClientError::Cancelled)
            }
            Err(e) => {
                crate::metrics::record_request(e.kind(), elapsed);
                self.emit(ControllerEvent::Failed {
                    request_id: ctx.request_id.clone(),
                    error: e.to_string(),
                });
                error!("Request {} failed: {}", ctx.request_id, e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        telemetry: &mut TelemetryAggregator,
    ) -> Result<RequestOutcome> {
        self.set_state(ctx, RequestState::CacheCheck);

        if self.config.cache_enabled {
            if let Some(hit) = self.check_cache(ctx).await? {
                self.set_state(ctx, RequestState::CacheHit);
                self.emit(ControllerEvent::CacheHit {
                    request_id: ctx.request_id.clone(),
                    similarity: hit.similarity,
                });
                telemetry.record_cache_hit(hit.similarity, Instant::now());
                return Ok(RequestOutcome {
                    request_id: ctx.request_id.clone(),
                    response: hit.response,
                    from_cache: true,
                    similarity: Some(hit.similarity),
                    attempts: 0,
                    telemetry: telemetry.finish(Instant::now()),
                });
            }
        }

        if ctx.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let timeout = self.config.timeout;
        let response = match tokio::time::timeout(timeout, self.stream_with_retries(ctx, telemetry)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Request {} exceeded {:?}", ctx.request_id, timeout);
                return Err(ClientError::Timeout(timeout));
            }
        };

        if self.config.cache_enabled {
            self.store(ctx, &response).await?;
        }

        let snapshot = telemetry.finish(Instant::now());
        self.emit(ControllerEvent::Telemetry {
            request_id: ctx.request_id.clone(),
            snapshot: snapshot.clone(),
        });

        Ok(RequestOutcome {
            request_id: ctx.request_id.clone(),
            response,
            from_cache: false,
            similarity: None,
            attempts: ctx.attempt(),
            telemetry: snapshot,
        })
    }

    /// Embed the prompt and look it up. Any failure here only means the
    /// cache is unavailable for this request; only cancellation is an error.
    async fn check_cache(&self, ctx: &mut RequestContext) -> Result<Option<CacheHit>> {
        let prompt = ctx.prompt.clone();
        let vector = match until_cancelled(ctx, self.embedder.embed(&prompt)).await? {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Embedding failed, skipping cache: {}", e);
                crate::metrics::record_cache_lookup("error");
                return Ok(None);
            }
        };

        let lookup = self.cache.lock().lookup(&vector);
        match lookup {
            Ok(Some(hit)) => {
                crate::metrics::record_cache_lookup("hit");
                Ok(Some(hit))
            }
            Ok(None) => {
                crate::metrics::record_cache_lookup("miss");
                Ok(None)
            }
            Err(e) => {
                warn!("Cache lookup failed: {}", e);
                crate::metrics::record_cache_lookup("error");
                Ok(None)
            }
        }
    }

    /// Cache a finished response under a fresh embedding of its prompt.
    /// A cancel arriving while the embedding is pending wins; nothing is stored.
    async fn store(&self, ctx: &mut RequestContext, response: &str) -> Result<()> {
        if response.is_empty() {
            debug!("Not caching empty response");
            return Ok(());
        }

        let prompt = ctx.prompt.clone();
        let vector = match until_cancelled(ctx, self.embedder.embed(&prompt)).await? {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Embedding failed, response not cached: {}", e);
                return Ok(());
            }
        };

        let inserted = self
            .cache
            .lock()
            .insert(&prompt, vector, response.to_string());
        match inserted {
            Ok(id) => {
                crate::metrics::record_cache_insert();
                debug!("Cached response as {}", id);
            }
            Err(e) => warn!("Failed to cache response: {}", e),
        }
        Ok(())
    }

    fn build_request(&self, ctx: &RequestContext) -> GenerationRequest {
        GenerationRequest {
            message: ctx.prompt.clone(),
            history: ctx.history.clone(),
            model: self.config.model.clone(),
            thinking_mode: self.config.thinking_mode,
            hybrid_mode: self.config.hybrid_mode,
            deep_research: self.config.deep_research,
            memory_context: self.config.memory_context,
            tools: self.config.tools.clone(),
            request_id: ctx.request_id.clone(),
            max_thinking_tokens: self.config.max_thinking_tokens,
            max_tokens: self.config.max_tokens,
        }
    }

    async fn stream_with_retries(
        &self,
        ctx: &mut RequestContext,
        telemetry: &mut TelemetryAggregator,
    ) -> Result<String> {
        let mut schedule = RetrySchedule::new(self.config.base_delay);

        loop {
            self.set_state(ctx, RequestState::Streaming);
            let attempt = ctx.attempt();

            let error = match self.stream_once(ctx, telemetry).await {
                Ok(response) => {
                    crate::metrics::record_transport_attempt("success");
                    return Ok(response);
                }
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(e) => e,
            };

            if !error.is_retryable() {
                crate::metrics::record_transport_attempt("failure");
                return Err(error);
            }

            if attempt >= self.config.max_retries {
                crate::metrics::record_transport_attempt("failure");
                return Err(ClientError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            crate::metrics::record_transport_attempt("retry");
            let delay = schedule.next_delay();
            warn!(
                "Attempt {}/{} for request {} failed: {}. Retrying in {}ms",
                attempt,
                self.config.max_retries,
                ctx.request_id,
                error,
                delay.as_millis()
            );
            self.set_state(ctx, RequestState::Retrying);
            self.emit(ControllerEvent::Retrying {
                request_id: ctx.request_id.clone(),
                attempt,
                delay,
                error: error.to_string(),
            });

            // Pausing does not stretch the backoff; only cancel cuts it short.
            until_cancelled(ctx, tokio::time::sleep(delay)).await?;
            ctx.retry_count += 1;
        }
    }

    /// Honour pause and cancel flags. Blocks while paused.
    async fn checkpoint(&self, ctx: &mut RequestContext) -> Result<()> {
        let mut signal = ctx.current_signal();
        loop {
            if signal.cancelled {
                return Err(ClientError::Cancelled);
            }
            if !signal.paused {
                if self.state() == RequestState::Paused {
                    self.set_state(ctx, RequestState::Streaming);
                }
                return Ok(());
            }
            if self.state() != RequestState::Paused {
                self.set_state(ctx, RequestState::Paused);
            }
            signal = ctx.next_signal().await;
        }
    }

    /// One transport attempt: open, decode and dispatch until `end`.
    async fn stream_once(
        &self,
        ctx: &mut RequestContext,
        telemetry: &mut TelemetryAggregator,
    ) -> Result<String> {
        // Nothing from an abandoned attempt survives into the next one.
        telemetry.reset_attempt();

        let request = self.build_request(ctx);
        debug!(
            "Opening transport for request {} (attempt {})",
            ctx.request_id,
            ctx.attempt()
        );
        let bytes = until_cancelled(ctx, self.transport.open(&request)).await??;
        let mut events = Box::pin(decode_stream(bytes));
        let mut response = String::new();

        loop {
            self.checkpoint(ctx).await?;

            let next = tokio::select! {
                // A pause or cancel arriving while we wait for data is
                // handled by the checkpoint on the next iteration.
                _ = ctx.next_signal() => continue,
                next = events.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ClientError::Transport(
                        "stream closed before end event".to_string(),
                    ))
                }
            };

            if self.dispatch(ctx, event, &mut response, telemetry).await {
                debug!("Request {} reached end of stream", ctx.request_id);
                return Ok(response);
            }
        }
    }

    /// Route one event. Returns true on `end`.
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        event: StreamEvent,
        response: &mut String,
        telemetry: &mut TelemetryAggregator,
    ) -> bool {
        let now = Instant::now();
        let request_id = ctx.request_id.clone();

        let refreshed = match event {
            StreamEvent::Thinking { content } => {
                let refreshed = telemetry.record_thinking(&content, now);
                self.emit(ControllerEvent::Thinking {
                    request_id: request_id.clone(),
                    content,
                });
                refreshed
            }
            StreamEvent::Content { full_text } => {
                let refreshed = telemetry.record_content(&full_text, now);
                response.clone_from(&full_text);
                self.emit(ControllerEvent::Content {
                    request_id: request_id.clone(),
                    full_text,
                });
                refreshed
            }
            StreamEvent::FunctionCall { name, parameters } => {
                if let Err(e) = self.handler.handle(&request_id, &name, &parameters).await {
                    warn!("Function call handler failed for {}: {}", name, e);
                }
                self.emit(ControllerEvent::FunctionCall {
                    request_id: request_id.clone(),
                    name,
                    parameters,
                });
                false
            }
            StreamEvent::Telemetry { metrics } => {
                telemetry.merge(&metrics, now);
                true
            }
            StreamEvent::End => return true,
        };

        if refreshed {
            self.emit(ControllerEvent::Telemetry {
                request_id,
                snapshot: telemetry.snapshot(),
            });
        }
        false
    }
}

/// Await `operation`, abandoning it as soon as the request is cancelled.
///
/// Covers the suspension points outside the read loop: embedding calls,
/// opening the transport and the backoff sleep.
async fn until_cancelled<F: Future>(
    ctx: &mut RequestContext,
    operation: F,
) -> Result<F::Output> {
    tokio::pin!(operation);

    loop {
        if ctx.current_signal().cancelled {
            return Err(ClientError::Cancelled);
        }
        tokio::select! {
            output = &mut operation => return Ok(output),
            _ = ctx.next_signal() => {}
        }
    }
}
