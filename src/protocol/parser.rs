// Newline-delimited event stream parser
// Author: kelexine (https://github.com/kelexine)

use super::StreamEvent;
use crate::error::Result;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// Outcome of decoding one delimited line.
enum LineOutcome {
    Event(StreamEvent),
    /// Blank lines, SSE comments and the `[DONE]` sentinel.
    Ignored,
    Malformed { reason: &'static str, detail: String },
}

/// Reassembles newline-delimited events from arbitrarily split chunks.
///
/// The buffer holds raw bytes rather than text so a multi-byte UTF-8
/// character split across two chunks is decoded only once complete.
/// Events come out in the order their delimiters arrive.
#[derive(Debug, Default)]
pub struct StreamEventParser {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to contain no delimiter.
    scanned: usize,
    decoded: u64,
    skipped: u64,
}

impl StreamEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        let mut scan = self.scanned;

        while let Some(pos) = self.buffer[scan..].iter().position(|b| *b == b'\n') {
            let end = scan + pos;
            let outcome = decode_line(&self.buffer[consumed..end]);
            if let Some(event) = self.account(outcome) {
                events.push(event);
            }
            consumed = end + 1;
            scan = consumed;
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        self.scanned = self.buffer.len();

        events
    }

    /// Decode whatever undelimited remainder is left once the stream ends.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let remainder = std::mem::take(&mut self.buffer);
        self.scanned = 0;

        if remainder.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        debug!("Decoding {} trailing bytes without delimiter", remainder.len());
        let outcome = decode_line(&remainder);
        self.account(outcome)
    }

    /// Discard buffered bytes, e.g. before reading a fresh transport.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Bytes waiting for a delimiter.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn decoded_events(&self) -> u64 {
        self.decoded
    }

    /// Lines dropped because they could not be decoded.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped
    }

    fn account(&mut self, outcome: LineOutcome) -> Option<StreamEvent> {
        match outcome {
            LineOutcome::Event(event) => {
                self.decoded += 1;
                crate::metrics::record_stream_event(event.event_type());
                Some(event)
            }
            LineOutcome::Ignored => None,
            LineOutcome::Malformed { reason, detail } => {
                self.skipped += 1;
                crate::metrics::record_malformed_line(reason);
                warn!("Skipping malformed stream line ({}): {}", reason, detail);
                None
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> LineOutcome {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            return LineOutcome::Malformed {
                reason: "encoding",
                detail: e.to_string(),
            }
        }
    };

    let mut line = text.trim();
    if line.is_empty() || line.starts_with(':') {
        return LineOutcome::Ignored;
    }

    // Tolerate SSE framing around the same JSON objects
    if let Some(data) = line.strip_prefix("data:") {
        line = data.trim_start();
    }
    if line == "[DONE]" {
        return LineOutcome::Ignored;
    }

    match StreamEvent::from_json(line) {
        Ok(event) => LineOutcome::Event(event),
        Err(e) => LineOutcome::Malformed {
            reason: if e.to_string().contains("unknown event type") {
                "unknown_type"
            } else {
                "json"
            },
            detail: format!("{} in {:?}", e, line.chars().take(120).collect::<String>()),
        },
    }
}

/// Turn a transport byte stream into a stream of decoded events.
///
/// Malformed lines are skipped. A transport error is passed through and
/// ends the stream without decoding the partial remainder. The byte stream
/// is only polled when the returned stream is, so a consumer that stops
/// polling stops reading the transport.
pub fn decode_stream<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let mut parser = StreamEventParser::new();
        let mut failed = false;

        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    debug!("Received chunk: {} bytes", chunk.len());
                    for event in parser.push(&chunk) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    warn!("Stream error: {}", e);
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !failed {
            if let Some(event) = parser.finish() {
                yield Ok(event);
            }
            debug!(
                "Event stream ended: {} decoded, {} skipped",
                parser.decoded_events(),
                parser.skipped_lines()
            );
        }
    }
}
