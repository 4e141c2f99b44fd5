//! Structured logging and credential-scrubbing helpers.
//!
//! Configures the `tracing` ecosystem for the client and provides a
//! sanitizer so upstream error bodies and request headers never leak API
//! keys into log sinks or terminal error messages.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// Supports two output formats:
/// - `json`: Structured JSON logs for machine ingestion.
/// - `pretty` (default): Human-readable output for interactive use.
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr
/// so streamed responses on stdout stay clean.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

/// Markers that precede a secret; everything up to the next delimiter is redacted.
const SECRET_MARKERS: &[(&str, &str)] = &[
    ("Bearer ", "[REDACTED_TOKEN]"),
    ("sk-", "[REDACTED_API_KEY]"),
];

/// Replaces bearer tokens and `sk-` style API keys with placeholders.
///
/// Every occurrence is redacted, not just the first.
pub fn sanitize(input: &str) -> String {
    let mut result = input.to_string();

    for (marker, placeholder) in SECRET_MARKERS {
        let mut search_from = 0;
        while let Some(offset) = result[search_from..].find(marker) {
            let marker_pos = search_from + offset;
            let start = marker_pos + marker.len();
            // "task-..." is not a key
            let glued = result[..marker_pos]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
            if glued {
                search_from = start;
                continue;
            }
            let end = result[start..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == ',')
                .map(|i| start + i)
                .unwrap_or(result.len());
            if end == start {
                search_from = start;
                continue;
            }
            result.replace_range(start..end, placeholder);
            search_from = start + placeholder.len();
        }
    }

    result
}
