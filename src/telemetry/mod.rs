//! Running per-request telemetry summary.
//!
//! Folds thinking/content progress and server-reported metric maps into a
//! [`TelemetrySnapshot`]. Token velocity is recomputed at most once per
//! throttle window so a fast stream does not churn observers.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum wall-clock progress between two token velocity recomputations.
pub const VELOCITY_THROTTLE: Duration = Duration::from_millis(500);

/// Point-in-time view of a request's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub tokens_used: u64,
    pub response_time_ms: u64,
    pub memory_utilization: f64,
    pub thinking_depth: u32,
    /// Approximate tokens per second.
    pub token_velocity: f64,
    pub confidence_score: f64,
    /// Similarity of the cache entry that answered the request, if any.
    pub semantic_distance: Option<f32>,
}

/// Rough token estimate: 1 token ≈ 4 characters.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

pub struct TelemetryAggregator {
    snapshot: TelemetrySnapshot,
    started_at: Instant,
    last_velocity_at: Option<Instant>,
    throttle: Duration,
    content_tokens: u64,
    thinking_tokens: u64,
    /// Once the server reports `tokensUsed`, the local estimate stops overriding it.
    server_reported_tokens: bool,
}

impl TelemetryAggregator {
    pub fn new(started_at: Instant) -> Self {
        Self::with_throttle(started_at, VELOCITY_THROTTLE)
    }

    pub fn with_throttle(started_at: Instant, throttle: Duration) -> Self {
        Self {
            snapshot: TelemetrySnapshot::default(),
            started_at,
            last_velocity_at: None,
            throttle,
            content_tokens: 0,
            thinking_tokens: 0,
            server_reported_tokens: false,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.clone()
    }

    fn approximate_tokens(&self) -> u64 {
        self.content_tokens + self.thinking_tokens
    }

    fn touch(&mut self, now: Instant) {
        self.snapshot.response_time_ms =
            now.saturating_duration_since(self.started_at).as_millis() as u64;
        if !self.server_reported_tokens {
            self.snapshot.tokens_used = self.approximate_tokens();
        }
    }

    /// Recompute velocity unless the last recomputation is within the throttle window.
    /// Returns whether a recomputation happened.
    fn maybe_recompute_velocity(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_velocity_at {
            if now.saturating_duration_since(last) < self.throttle {
                return false;
            }
        }
        self.recompute_velocity(now);
        true
    }

    fn recompute_velocity(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        self.snapshot.token_velocity = if elapsed > 0.0 {
            self.approximate_tokens() as f64 / elapsed
        } else {
            0.0
        };
        self.last_velocity_at = Some(now);
    }

    /// Forget everything a failed transport attempt reported. The request
    /// start time and any cache similarity are kept.
    pub fn reset_attempt(&mut self) {
        self.snapshot = TelemetrySnapshot {
            response_time_ms: self.snapshot.response_time_ms,
            semantic_distance: self.snapshot.semantic_distance,
            ..TelemetrySnapshot::default()
        };
        self.last_velocity_at = None;
        self.content_tokens = 0;
        self.thinking_tokens = 0;
        self.server_reported_tokens = false;
    }

    /// A reasoning fragment arrived; deepens the thinking metric.
    pub fn record_thinking(&mut self, content: &str, now: Instant) -> bool {
        self.snapshot.thinking_depth += 1;
        self.thinking_tokens += estimate_tokens(content);
        self.touch(now);
        self.maybe_recompute_velocity(now)
    }

    /// A new full-text snapshot arrived.
    pub fn record_content(&mut self, full_text: &str, now: Instant) -> bool {
        self.content_tokens = estimate_tokens(full_text);
        self.touch(now);
        self.maybe_recompute_velocity(now)
    }

    /// Merge a server-sent metric map. Keys are accepted in camelCase or
    /// snake_case; unknown keys are ignored.
    pub fn merge(&mut self, metrics: &Map<String, Value>, now: Instant) {
        for (key, value) in metrics {
            match key.as_str() {
                "tokensUsed" | "tokens_used" => {
                    if let Some(tokens) = value.as_u64() {
                        self.snapshot.tokens_used = tokens;
                        self.server_reported_tokens = true;
                    }
                }
                "memoryUtilization" | "memory_utilization" => {
                    if let Some(v) = value.as_f64() {
                        self.snapshot.memory_utilization = v;
                    }
                }
                "thinkingDepth" | "thinking_depth" => {
                    if let Some(v) = value.as_u64() {
                        self.snapshot.thinking_depth =
                            self.snapshot.thinking_depth.max(v.min(u64::from(u32::MAX)) as u32);
                    }
                }
                "confidenceScore" | "confidence_score" | "confidence" => {
                    if let Some(v) = value.as_f64() {
                        self.snapshot.confidence_score = v.clamp(0.0, 1.0);
                    }
                }
                other => debug!("Ignoring unknown telemetry key: {}", other),
            }
        }
        self.touch(now);
    }

    /// The request was answered from the cache with the given similarity.
    pub fn record_cache_hit(&mut self, similarity: f32, now: Instant) {
        self.snapshot.semantic_distance = Some(similarity);
        self.snapshot.confidence_score = f64::from(similarity).clamp(0.0, 1.0);
        self.touch(now);
    }

    /// Final update when the request ends; bypasses the throttle.
    pub fn finish(&mut self, now: Instant) -> TelemetrySnapshot {
        self.touch(now);
        self.recompute_velocity(now);
        self.snapshot()
    }
}
