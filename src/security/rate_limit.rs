//! Sliding-window rate limiting shared across replicas.
//!
//! Each identifier owns a sorted set in the store (`ratelimit:<identifier>`)
//! with one member per request, scored by its arrival time in milliseconds.
//! A check prunes, counts, inserts and re-arms the TTL in one atomic pipeline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};

use crate::http::errors;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::identity::client_identifier;
use crate::store::{keys, Pipeline, SharedStore, StoreError};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Outcome of one rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in the window after this one.
    pub remaining: u32,
    /// When the window that admitted this request ends.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until `reset_at`, never less than one.
    pub fn retry_after_secs(&self) -> i64 {
        let millis = (self.reset_at - Utc::now()).num_milliseconds();
        ((millis + 999) / 1000).max(1)
    }
}

/// Sliding-window counter per client identity.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Count this request against `identifier`'s window.
    ///
    /// Every request, including rejected ones, is recorded in the window.
    /// Store failures are returned to the caller, which decides to fail open.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, StoreError> {
        let key = format!("{}{}", keys::RATE_LIMIT_PREFIX, identifier);
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let replies = self
            .store
            .exec(
                Pipeline::new()
                    .zrem_range_by_score(key.clone(), 0, now_ms.saturating_sub(window_ms))
                    .zcard(key.clone())
                    .zadd(key.clone(), now_ms, uuid::Uuid::new_v4().to_string())
                    .expire(key.clone(), window),
            )
            .await?;

        let count = replies
            .get(1)
            .and_then(|r| r.as_int())
            .ok_or_else(|| StoreError::UnexpectedReply(format!("ZCARD {key}")))?;
        let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);

        let allowed = count < max_requests;
        let remaining = if allowed { max_requests - count - 1 } else { 0 };
        let reset_at = now + chrono::Duration::milliseconds(window_ms);

        if !allowed {
            tracing::warn!(identifier, count, max = max_requests, "Rate limit exceeded");
        }

        Ok(RateLimitDecision {
            allowed,
            limit: max_requests,
            remaining,
            reset_at,
        })
    }
}

/// Write the `X-RateLimit-*` headers for a decision.
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.to_rfc3339()) {
        headers.insert(X_RATELIMIT_RESET, value);
    }
}

/// Middleware enforcing the configured per-client request budget.
///
/// Store failures let the request through and are only logged.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = &state.config.rate_limit;
    if !settings.enabled {
        return next.run(request).await;
    }

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(request.headers(), remote);

    let decision = match state
        .rate_limiter
        .check_rate_limit(&identifier, settings.max_requests, settings.window())
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(error = %e, identifier = %identifier, "Rate limit check failed, allowing request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        tracing::warn!(
            identifier = %identifier,
            endpoint = %request.uri().path(),
            "Rejecting rate limited request"
        );
        metrics::record_rate_limited("window_exceeded");
        let mut response = errors::rate_limit_exceeded(&decision);
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    tracing::debug!(identifier = %identifier, remaining = decision.remaining, "Rate limit check passed");
    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
