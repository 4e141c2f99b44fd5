// Request lifecycle state and per-request context
// Author: kelexine (https://github.com/kelexine)

use crate::protocol::Turn;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;
use tokio::sync::watch;

/// Prior turns sent with each request.
pub const MAX_HISTORY_TURNS: usize = 10;

/// Lifecycle of one logical request.
///
/// `Idle → CacheCheck → {CacheHit | Streaming} → {Paused ⇄ Streaming} →
/// {Completed | Retrying → Streaming | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    CacheCheck,
    CacheHit,
    Streaming,
    Paused,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::CacheCheck => "cache_check",
            RequestState::CacheHit => "cache_hit",
            RequestState::Streaming => "streaming",
            RequestState::Paused => "paused",
            RequestState::Retrying => "retrying",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        }
    }

    /// No further transitions happen for the request once here.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative flags, checked at the top of each read iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSignal {
    pub paused: bool,
    pub cancelled: bool,
}

/// Everything the controller tracks for the request in flight.
/// Dropped on completion, failure or cancellation.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub prompt: String,
    /// Transport reopenings so far; the first attempt is 0.
    pub retry_count: u32,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    /// Prior turns, oldest first, at most [`MAX_HISTORY_TURNS`].
    pub history: Vec<Turn>,
    control: watch::Receiver<ControlSignal>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        prompt: &str,
        history: Vec<Turn>,
        control: watch::Receiver<ControlSignal>,
    ) -> Self {
        Self {
            request_id,
            prompt: prompt.to_string(),
            retry_count: 0,
            start_time: Instant::now(),
            started_at: Utc::now(),
            history: bounded_history(history),
            control,
        }
    }

    /// 1-based number of the current transport attempt.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn is_paused(&self) -> bool {
        self.control.borrow().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.borrow().cancelled
    }

    /// Latest signal, marking it seen.
    pub(crate) fn current_signal(&mut self) -> ControlSignal {
        *self.control.borrow_and_update()
    }

    /// Wait until pause/cancel flags change. Never resolves once the
    /// controlling side is gone.
    pub(crate) async fn next_signal(&mut self) -> ControlSignal {
        if self.control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        *self.control.borrow_and_update()
    }
}

/// Keep only the most recent turns.
pub fn bounded_history(history: Vec<Turn>) -> Vec<Turn> {
    let skip = history.len().saturating_sub(MAX_HISTORY_TURNS);
    history.into_iter().skip(skip).collect()
}

/// Append a finished exchange and trim the log to the turn limit.
pub(crate) fn record_exchange(history: &mut VecDeque<Turn>, prompt: &str, response: &str) {
    history.push_back(Turn::user(prompt));
    history.push_back(Turn::assistant(response));
    while history.len() > MAX_HISTORY_TURNS {
        history.pop_front();
    }
}
