//! Query response caching.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::cache::query::display_key;
use crate::cache::GraphQLRequest;
use crate::http::capture::ResponseCapture;
use crate::http::errors;
use crate::http::server::AppState;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

/// Serve cached query responses and store fresh successful ones.
///
/// Only POSTed, parseable, non-mutation operations take part. A store
/// failure on lookup is treated as a miss.
pub async fn cache_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if !state.config.cache.enabled || request.method() != Method::POST {
        return next.run(request).await;
    }

    let limit = state.config.listener.max_body_bytes;
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return errors::payload_too_large(limit);
        }
    };

    let operation: GraphQLRequest = match serde_json::from_slice(&bytes) {
        Ok(operation) => operation,
        Err(e) => {
            tracing::debug!(error = %e, "Body is not a GraphQL request, bypassing cache");
            return next.run(Request::from_parts(parts, Body::from(bytes))).await;
        }
    };

    if operation.is_mutation() {
        tracing::debug!("Skipping cache for mutation");
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    }

    let key = state.query_cache.key_for(&operation);
    let shown = HeaderValue::from_str(&display_key(&key)).ok();

    match state.query_cache.get(&key).await {
        Ok(Some(cached)) => {
            let mut response = (
                StatusCode::OK,
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                cached,
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
            if let Some(shown) = shown {
                headers.insert(X_CACHE_KEY, shown);
            }
            return response;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Cache lookup failed, treating as miss"),
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    let capture = match ResponseCapture::from_response(response, usize::MAX).await {
        Ok(capture) => capture,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read downstream response");
            return errors::service_error();
        }
    };

    if capture.is_cacheable() {
        match state.query_cache.set(&key, capture.body.to_vec(), None).await {
            Ok(()) => tracing::info!(key = %key, size = capture.body.len(), "Cached response"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to set cache"),
        }
    }

    let mut response = capture.into_response();
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
    if let Some(shown) = shown {
        headers.insert(X_CACHE_KEY, shown);
    }
    response
}
