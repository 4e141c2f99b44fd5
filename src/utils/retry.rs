// Retry delay schedule for reopening a failed generation stream
// Author: kelexine (https://github.com/kelexine)

use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::debug;

/// Upper bound for a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Create a deterministic exponential backoff: `base`, `2 * base`, `4 * base`, ...
///
/// No jitter and no elapsed-time cutoff; the controller bounds the number of
/// attempts itself.
pub fn create_backoff(base_delay: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: base_delay,
        initial_interval: base_delay,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: MAX_RETRY_DELAY,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Tracks the delay schedule for one logical request.
///
/// The n-th call to [`RetrySchedule::next_delay`] yields `base * 2^n`,
/// capped at 60 seconds.
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
}

impl RetrySchedule {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            backoff: create_backoff(base_delay),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.next_backoff().unwrap_or(MAX_RETRY_DELAY);
        debug!("Next retry delay: {}ms", delay.as_millis());
        delay
    }
}

/// Determine if an HTTP status code is retryable
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
