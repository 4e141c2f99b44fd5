//! Cross-cutting helpers for the semantic-stream client.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization and credential scrubbing.
//! - `retry`: Deterministic exponential backoff for stream reconnects.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
