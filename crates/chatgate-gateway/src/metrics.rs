//! Prometheus metrics for Chatgate Gateway
//!
//! Exposes metrics for monitoring request outcomes, moderation and upstream
//! behaviour.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, GaugeVec, Histogram,
};

lazy_static! {
    // ============================================================================
    // Request Metrics
    // ============================================================================

    /// Chat requests by outcome
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "chatgate_requests_total",
        "Chat requests by outcome",
        &["outcome"]
    )
    .expect("register chatgate_requests_total");

    // ============================================================================
    // Pipeline Metrics
    // ============================================================================

    /// Messages rejected by moderation
    pub static ref FLAGGED_MESSAGES: Counter = register_counter!(
        "chatgate_flagged_messages_total",
        "Messages flagged by moderation"
    )
    .expect("register chatgate_flagged_messages_total");

    /// Context messages dropped to fit the window
    pub static ref TRIMMED_MESSAGES: Counter = register_counter!(
        "chatgate_trimmed_messages_total",
        "Context messages dropped to fit the model context window"
    )
    .expect("register chatgate_trimmed_messages_total");

    /// Wall time of the moderation fan-out, barrier included
    pub static ref MODERATION_LATENCY: Histogram = register_histogram!(
        "chatgate_moderation_latency_seconds",
        "Moderation fan-out latency in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("register chatgate_moderation_latency_seconds");

    // ============================================================================
    // Upstream Metrics
    // ============================================================================

    /// Time until upstream answered with headers
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "chatgate_upstream_latency_seconds",
        "Upstream completion time to headers in seconds",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("register chatgate_upstream_latency_seconds");

    /// Upstream failures by service and error kind
    pub static ref UPSTREAM_ERRORS: CounterVec = register_counter_vec!(
        "chatgate_upstream_errors_total",
        "Upstream failures",
        &["service", "error_type"]
    )
    .expect("register chatgate_upstream_errors_total");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Build info
    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "chatgate_build_info",
        "Build information",
        &["version", "commit"]
    )
    .expect("register chatgate_build_info");
}

/// Initialize metrics with build info
pub fn init_metrics() {
    BUILD_INFO
        .with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            option_env!("GIT_COMMIT_SHA").unwrap_or("unknown"),
        ])
        .set(1.0);
}

/// Export metrics in Prometheus format
pub fn export() -> anyhow::Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
