//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): rejected requests by reason
//! - `gateway_cache_lookups_total` (counter): lookups by cache, result
//! - `gateway_circuit_transitions_total` (counter): breaker state changes
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_retry_outcomes_total` (counter): retry executions by outcome
//! - `gateway_schema_refresh_total` (counter): schema loads by service, source
//! - `gateway_subgraphs_available` (gauge): subgraphs in the last poll

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];
    metrics::counter!("gateway_requests_total", &labels).increment(1);
    metrics::histogram!("gateway_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    metrics::counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

/// `result` is one of `hit`, `miss`, `error`.
pub fn record_cache_lookup(cache: &'static str, result: &'static str) {
    metrics::counter!("gateway_cache_lookups_total", "cache" => cache, "result" => result).increment(1);
}

pub fn record_circuit_transition(breaker: &str, to: &'static str) {
    metrics::counter!(
        "gateway_circuit_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);

    let level = match to {
        "closed" => 0.0,
        "half-open" => 1.0,
        _ => 2.0,
    };
    metrics::gauge!("gateway_circuit_state", "breaker" => breaker.to_string()).set(level);
}

pub fn record_retry_outcome(policy: &str, outcome: &'static str) {
    metrics::counter!(
        "gateway_retry_outcomes_total",
        "policy" => policy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// `source` is one of `cache`, `network`, `fallback`, `unavailable`.
pub fn record_schema_refresh(service: &str, source: &'static str) {
    metrics::counter!(
        "gateway_schema_refresh_total",
        "service" => service.to_string(),
        "source" => source
    )
    .increment(1);
}

pub fn set_subgraphs_available(count: usize) {
    metrics::gauge!("gateway_subgraphs_available").set(count as f64);
}
