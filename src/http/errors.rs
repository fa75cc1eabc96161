//! GraphQL-shaped error responses.
//!
//! Every rejection the gateway produces itself is a well-formed
//! `{"errors":[{"message", "extensions":{"code", ...}}]}` body with a
//! machine-readable code, never a bare status line.

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use crate::resilience::CircuitBreakerMetrics;
use crate::security::RateLimitDecision;

pub const X_CIRCUIT_BREAKER_STATE: HeaderName = HeaderName::from_static("x-circuit-breaker-state");

/// Seconds a client is told to wait before retrying an open circuit.
pub const CIRCUIT_OPEN_RETRY_AFTER: u64 = 60;

/// Seconds a client is told to wait while the circuit is probing.
pub const CIRCUIT_HALF_OPEN_RETRY_AFTER: u64 = 5;

/// Build a response with a single GraphQL error.
pub fn graphql_error(status: StatusCode, message: &str, code: &str, extra: Map<String, Value>) -> Response {
    let mut extensions = Map::new();
    extensions.insert("code".into(), Value::from(code));
    extensions.extend(extra);

    let body = json!({
        "errors": [{
            "message": message,
            "extensions": extensions,
        }]
    });
    (status, Json(body)).into_response()
}

pub fn rate_limit_exceeded(decision: &RateLimitDecision) -> Response {
    let mut extra = Map::new();
    extra.insert("limit".into(), Value::from(decision.limit));
    extra.insert("remaining".into(), Value::from(0));
    extra.insert("reset".into(), Value::from(decision.reset_at.to_rfc3339()));

    let mut response = graphql_error(
        StatusCode::TOO_MANY_REQUESTS,
        "Rate limit exceeded. Please try again later.",
        "RATE_LIMIT_EXCEEDED",
        extra,
    );
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
    response
}

pub fn circuit_open(metrics: &CircuitBreakerMetrics) -> Response {
    let mut extra = Map::new();
    extra.insert("circuit_state".into(), Value::from(metrics.state.as_str()));
    extra.insert("failure_count".into(), Value::from(metrics.failure_count));
    extra.insert("retry_after".into(), Value::from(CIRCUIT_OPEN_RETRY_AFTER));

    let mut response = graphql_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service temporarily unavailable - circuit breaker is open",
        "CIRCUIT_BREAKER_OPEN",
        extra,
    );
    let headers = response.headers_mut();
    headers.insert(X_CIRCUIT_BREAKER_STATE, HeaderValue::from_static("open"));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(CIRCUIT_OPEN_RETRY_AFTER));
    response
}

pub fn circuit_half_open() -> Response {
    let mut extra = Map::new();
    extra.insert("retry_after".into(), Value::from(CIRCUIT_HALF_OPEN_RETRY_AFTER));

    let mut response = graphql_error(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many requests - circuit breaker is in recovery mode",
        "CIRCUIT_BREAKER_HALF_OPEN",
        extra,
    );
    let headers = response.headers_mut();
    headers.insert(X_CIRCUIT_BREAKER_STATE, HeaderValue::from_static("half-open"));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(CIRCUIT_HALF_OPEN_RETRY_AFTER));
    response
}

pub fn service_error() -> Response {
    graphql_error(StatusCode::BAD_GATEWAY, "Service error", "SERVICE_ERROR", Map::new())
}

pub fn upstream_timeout() -> Response {
    graphql_error(
        StatusCode::GATEWAY_TIMEOUT,
        "Upstream service timed out",
        "UPSTREAM_TIMEOUT",
        Map::new(),
    )
}

pub fn payload_too_large(limit: usize) -> Response {
    let mut extra = Map::new();
    extra.insert("limit_bytes".into(), Value::from(limit));
    graphql_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        "Request body too large",
        "PAYLOAD_TOO_LARGE",
        extra,
    )
}
