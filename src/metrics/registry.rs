// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, HistogramVec, GaugeVec, Opts, Registry, TextEncoder, Encoder,
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_gauge_vec_with_registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // REQUEST METRICS
    // ============================================================================

    /// Logical requests by terminal outcome
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("requests_total", "Total logical generation requests"),
        &["outcome"], // outcome: cache_hit, completed, failed, cancelled, busy
        REGISTRY
    ).unwrap();

    /// Request duration histogram
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
            .buckets(vec![0.005, 0.05, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["outcome"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // TRANSPORT METRICS
    // ============================================================================

    /// Transport attempts
    pub static ref TRANSPORT_ATTEMPTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("transport_attempts_total", "Total generation stream attempts"),
        &["outcome"], // outcome: success, retry, failure
        REGISTRY
    ).unwrap();

    /// Decoded stream events
    pub static ref STREAM_EVENTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("stream_events_total", "Total decoded stream events"),
        &["event_type"],
        REGISTRY
    ).unwrap();

    /// Lines skipped by the event parser
    pub static ref MALFORMED_LINES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("stream_malformed_lines_total", "Stream lines that failed to decode"),
        &["reason"], // reason: encoding, json, unknown_type
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("cache_operations_total", "Total cache operations"),
        &["operation"], // operation: hit, miss, error, insert, eviction
        REGISTRY
    ).unwrap();

    /// Current cache entries
    pub static ref CACHE_ENTRIES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("cache_entries_current", "Current number of cache entries"),
        &["type"], // type: active
        REGISTRY
    ).unwrap();

    // ============================================================================
    // PERSISTENCE METRICS
    // ============================================================================

    /// Durable store operations
    pub static ref PERSISTENCE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("persistence_operations_total", "Total persistence operations"),
        &["operation", "status"], // operation: load, flush, cleanup, clear
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
