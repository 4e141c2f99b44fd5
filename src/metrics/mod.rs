// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    REQUESTS_TOTAL,
    REQUEST_DURATION,
    TRANSPORT_ATTEMPTS,
    STREAM_EVENTS,
    MALFORMED_LINES,
    CACHE_OPERATIONS,
    CACHE_ENTRIES,
    PERSISTENCE_OPERATIONS,
};

/// Helper to record a finished logical request
pub fn record_request(outcome: &str, duration_secs: f64) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    REQUEST_DURATION.with_label_values(&[outcome]).observe(duration_secs);
}

/// Helper to record one transport attempt
pub fn record_transport_attempt(outcome: &str) {
    TRANSPORT_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_stream_event(event_type: &str) {
    STREAM_EVENTS.with_label_values(&[event_type]).inc();
}

pub fn record_malformed_line(reason: &str) {
    MALFORMED_LINES.with_label_values(&[reason]).inc();
}

/// Helper to record cache lookups (hit, miss, error)
pub fn record_cache_lookup(result: &str) {
    CACHE_OPERATIONS.with_label_values(&[result]).inc();
}

pub fn record_cache_insert() {
    CACHE_OPERATIONS.with_label_values(&["insert"]).inc();
}

pub fn record_cache_eviction() {
    CACHE_OPERATIONS.with_label_values(&["eviction"]).inc();
}

pub fn update_cache_entries(count: usize) {
    CACHE_ENTRIES.with_label_values(&["active"]).set(count as f64);
}

/// Helper to record durable store operations
pub fn record_persistence(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    PERSISTENCE_OPERATIONS.with_label_values(&[operation, status]).inc();
}
