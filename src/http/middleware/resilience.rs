//! Retry and circuit breaking for the query endpoint.
//!
//! Each retry attempt runs through the breaker; a 5xx from below counts as
//! a failed attempt. The last captured response is replayed to the client
//! with `X-Retry-Attempt` and `X-Retry-Result` set.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{request::Parts, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::RetryConfig;
use crate::error::{find_signal, BoxError, ResilienceError};
use crate::http::capture::ResponseCapture;
use crate::http::errors::{self, X_CIRCUIT_BREAKER_STATE};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::{default_should_retry, http_status_should_retry};

/// Breaker and retry policy name guarding the query endpoint.
pub const GATEWAY_POLICY: &str = "api-gateway";

pub const X_RETRY_ATTEMPT: HeaderName = HeaderName::from_static("x-retry-attempt");
pub const X_RETRY_RESULT: HeaderName = HeaderName::from_static("x-retry-result");

pub async fn resilience_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let limit = state.config.listener.max_body_bytes;

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            let response = errors::payload_too_large(limit);
            metrics::record_request(&method, response.status().as_u16(), start);
            return response;
        }
    };

    let breaker = state
        .breakers
        .get_or_create(GATEWAY_POLICY, &state.config.circuit_breaker.gateway);
    let retry = state
        .retries
        .get_or_create(GATEWAY_POLICY, &state.config.retries.gateway);
    let cancel = state.shutdown.child_token();

    let last: Mutex<Option<(u32, ResponseCapture)>> = Mutex::new(None);
    let outcome = {
        let breaker = breaker.as_ref();
        let (parts, bytes, last) = (&parts, &bytes, &last);
        let retry_config = retry.config();

        retry
            .execute_with_condition(
                &cancel,
                move |attempt| {
                    let next = next.clone();
                    let request = rebuild_request(parts, bytes, attempt);
                    async move {
                        breaker
                            .execute(|| async move {
                                let response = next.run(request).await;
                                let capture = ResponseCapture::from_response(response, usize::MAX).await?;
                                let status = capture.status.as_u16();
                                *last.lock().unwrap_or_else(PoisonError::into_inner) = Some((attempt, capture));
                                if status >= 500 {
                                    Err(ResilienceError::UpstreamStatus { status }.boxed())
                                } else {
                                    Ok(())
                                }
                            })
                            .await
                    }
                },
                |err, _| gateway_should_retry(retry_config, err),
            )
            .await
    };

    let captured = last.into_inner().unwrap_or_else(PoisonError::into_inner);
    let response = match (outcome, captured) {
        (Ok(()), Some((attempt, capture))) => replay(capture, attempt, true),
        (Err(err), Some((attempt, capture))) => {
            let mut response = replay(capture, attempt, false);
            if let Some(ResilienceError::CircuitOpen { .. }) = find_signal(err.as_ref()) {
                response
                    .headers_mut()
                    .insert(X_CIRCUIT_BREAKER_STATE, HeaderValue::from_static("open"));
            }
            response
        }
        (Err(err), None) => match find_signal(err.as_ref()) {
            Some(ResilienceError::CircuitOpen { .. }) => {
                tracing::warn!(path = %parts.uri.path(), "Circuit breaker open, rejecting request");
                errors::circuit_open(&breaker.metrics().await)
            }
            Some(ResilienceError::TooManyRequests { .. }) => errors::circuit_half_open(),
            _ => {
                tracing::error!(error = %err, "Query failed before producing a response");
                errors::service_error()
            }
        },
        (Ok(()), None) => errors::service_error(),
    };

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

/// Breaker rejections end the loop; downstream statuses follow the HTTP
/// retry table; everything else uses the default predicate.
fn gateway_should_retry(config: &RetryConfig, err: &BoxError) -> bool {
    match find_signal(err.as_ref()) {
        Some(ResilienceError::CircuitOpen { .. } | ResilienceError::TooManyRequests { .. }) => false,
        Some(ResilienceError::UpstreamStatus { status }) => http_status_should_retry(config, *status),
        _ => default_should_retry(config, err),
    }
}

fn rebuild_request(parts: &Parts, body: &Bytes, attempt: u32) -> Request<Body> {
    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    *request.extensions_mut() = parts.extensions.clone();
    request.headers_mut().insert(X_RETRY_ATTEMPT, HeaderValue::from(attempt));
    request
}

fn replay(capture: ResponseCapture, attempt: u32, succeeded: bool) -> Response {
    let mut response = capture.into_response();
    let headers = response.headers_mut();
    headers.insert(X_RETRY_ATTEMPT, HeaderValue::from(attempt));
    headers.insert(
        X_RETRY_RESULT,
        HeaderValue::from_static(if succeeded { "success" } else { "failed" }),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_retry_predicate() {
        let config = RetryConfig {
            retry_on_5xx: false,
            ..RetryConfig::gateway_default()
        };

        let open = ResilienceError::CircuitOpen { name: "x".into() }.boxed();
        assert!(!gateway_should_retry(&config, &open));

        let probing = ResilienceError::TooManyRequests { name: "x".into() }.boxed();
        assert!(!gateway_should_retry(&config, &probing));

        let unavailable = ResilienceError::UpstreamStatus { status: 503 }.boxed();
        assert!(gateway_should_retry(&config, &unavailable));

        let internal = ResilienceError::UpstreamStatus { status: 500 }.boxed();
        assert!(!gateway_should_retry(&config, &internal));

        let transport: BoxError = "connection reset".into();
        assert!(gateway_should_retry(&config, &transport));
    }

    #[test]
    fn test_rebuild_sets_attempt_header() {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri("/query")
            .header("x-custom", "1")
            .body(())
            .unwrap()
            .into_parts();
        let request = rebuild_request(&parts, &Bytes::from_static(b"{}"), 3);
        assert_eq!(request.method(), "POST");
        assert_eq!(request.headers()["x-custom"], "1");
        assert_eq!(request.headers()[X_RETRY_ATTEMPT], "3");
    }
}
