//! Control-flow signals shared by the resilience components.
//!
//! Wrapped actions return [`BoxError`]. Signals raised by the breaker, the
//! retry executor or the middleware chain travel boxed as
//! [`ResilienceError`] and are recognised again by downcasting, so a layer
//! that does not understand an error passes it through untouched.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Type-erased error returned by wrapped actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Typed outcomes that callers are expected to handle, not crash on.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The breaker is open and the cooldown has not elapsed.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// All half-open probe slots are taken.
    #[error("too many requests in half-open state for circuit breaker '{name}'")]
    TooManyRequests { name: String },

    /// Every attempt failed; carries the last underlying error.
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last: BoxError,
    },

    /// Marker for errors the caller knows must not be retried.
    #[error("non-retryable error: {0}")]
    NonRetryable(#[source] BoxError),

    /// The caller aborted the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A downstream responded with a failure status.
    #[error("upstream service error: {status}")]
    UpstreamStatus { status: u16 },

    /// The requested resource does not exist; retrying will not help.
    #[error("not found: {0}")]
    NotFound(String),

    /// A single attempt exceeded its own deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ResilienceError {
    /// Box the signal so it can flow through a `Result<_, BoxError>`.
    pub fn boxed(self) -> BoxError {
        Box::new(self)
    }
}

/// Find a [`ResilienceError`] at the top of the error or anywhere in its source chain.
pub fn find_signal<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a ResilienceError> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(signal) = e.downcast_ref::<ResilienceError>() {
            return Some(signal);
        }
        current = e.source();
    }
    None
}

/// True when the error is (or wraps) an open circuit.
pub fn is_circuit_open(err: &BoxError) -> bool {
    matches!(
        err.downcast_ref::<ResilienceError>(),
        Some(ResilienceError::CircuitOpen { .. })
    )
}

/// True when the error represents a deadline or timeout of a single call.
pub fn is_timeout(err: &BoxError) -> bool {
    if let Some(ResilienceError::Timeout(_)) = err.downcast_ref::<ResilienceError>() {
        return true;
    }
    if let Some(StoreError::Timeout(_)) = err.downcast_ref::<StoreError>() {
        return true;
    }
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return true;
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return e.is_timeout();
    }
    false
}
