//! Retry logic.
//!
//! # Responsibilities
//! - Run an attempt function up to `max_attempts` times, sequentially
//! - Sleep a jittered exponential backoff between attempts
//! - Abort immediately when the caller's cancellation token fires
//! - Count attempts, successes and failures per policy in the store
//!
//! # Design Decisions
//! - The retry predicate is pluggable; the default never retries an open circuit
//! - Exhaustion wraps the last error in `MaxRetriesExceeded`
//! - A rejected retry returns the error unchanged
//! - Cancellation is terminal: no further attempt, no backoff
//! - Store-persisted counters are for observability only and never read back

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{find_signal, is_timeout, BoxError, ResilienceError};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::store::{keys, Pipeline, SharedStore, StoreError};

/// Lifetime of the store-persisted retry counters.
pub const METRICS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Aggregate retry counters for one policy, as served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RetryMetrics {
    pub name: String,
    pub total_attempts: i64,
    pub successful_ops: i64,
    pub failed_ops: i64,
    pub success_rate: String,
    pub avg_retries_per_op: String,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// A named retry policy.
pub struct Retry {
    name: String,
    config: RetryConfig,
    store: Arc<dyn SharedStore>,
}

impl Retry {
    pub fn new(name: impl Into<String>, config: RetryConfig, store: Arc<dyn SharedStore>) -> Self {
        Self {
            name: name.into(),
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `attempt_fn` with the default retry predicate.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, attempt_fn: F) -> Result<T, BoxError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let config = &self.config;
        self.execute_with_condition(cancel, attempt_fn, |err, _| default_should_retry(config, err))
            .await
    }

    /// Run `attempt_fn` (called with the 1-based attempt number) until it
    /// succeeds, `should_retry` rejects an error, attempts run out, or
    /// `cancel` fires.
    pub async fn execute_with_condition<T, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
        should_retry: P,
    ) -> Result<T, BoxError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
        P: Fn(&BoxError, u32) -> bool,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled.boxed());
            }
            self.record("attempts").await;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled.boxed()),
                result = attempt_fn(attempt) => result,
            };

            let err = match result {
                Ok(value) => {
                    self.record("success").await;
                    metrics::record_retry_outcome(&self.name, "success");
                    if attempt > 1 {
                        tracing::info!(policy = %self.name, attempt, max_attempts, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !should_retry(&err, attempt) {
                self.record("failure").await;
                metrics::record_retry_outcome(&self.name, "non_retryable");
                tracing::warn!(policy = %self.name, attempt, error = %err, "Non-retryable error");
                return Err(err);
            }

            if attempt >= max_attempts {
                self.record("failure").await;
                metrics::record_retry_outcome(&self.name, "exhausted");
                tracing::error!(policy = %self.name, max_attempts, error = %err, "Max retry attempts exceeded");
                return Err(ResilienceError::MaxRetriesExceeded { attempts: attempt, last: err }.boxed());
            }

            let delay = calculate_backoff(attempt, &self.config);
            tracing::warn!(
                policy = %self.name,
                attempt,
                max_attempts,
                delay = ?delay,
                error = %err,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled.boxed()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn metrics(&self) -> Result<RetryMetrics, StoreError> {
        let replies = self
            .store
            .exec(
                Pipeline::new()
                    .get(self.key("attempts"))
                    .get(self.key("success"))
                    .get(self.key("failure")),
            )
            .await?;
        let count = |i: usize| replies.get(i).and_then(|r| r.as_int()).unwrap_or(0);
        let (attempts, success, failure) = (count(0), count(1), count(2));

        let total_ops = success + failure;
        let (success_rate, avg_retries) = if total_ops > 0 {
            (
                success as f64 / total_ops as f64 * 100.0,
                attempts as f64 / total_ops as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(RetryMetrics {
            name: self.name.clone(),
            total_attempts: attempts,
            successful_ops: success,
            failed_ops: failure,
            success_rate: format!("{success_rate:.2}%"),
            avg_retries_per_op: format!("{avg_retries:.2}"),
            max_attempts: self.config.max_attempts,
            initial_delay_ms: self.config.initial_delay_ms,
            max_delay_ms: self.config.max_delay_ms,
        })
    }

    /// Clear this policy's counters.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store
            .del(vec![self.key("attempts"), self.key("success"), self.key("failure")])
            .await?;
        Ok(())
    }

    async fn record(&self, counter: &str) {
        if let Err(e) = self.store.incr_with_ttl(&self.key(counter), METRICS_TTL).await {
            tracing::debug!(policy = %self.name, counter, error = %e, "Failed to record retry metric");
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}:{}", keys::RETRY_METRICS_PREFIX, self.name, suffix)
    }
}

/// Default predicate: never retry an open circuit, a marked non-retryable
/// error, a cancellation or a missing resource; retry timeouts only when
/// `retry_on_timeout` is set; retry everything else.
pub fn default_should_retry(config: &RetryConfig, err: &BoxError) -> bool {
    match find_signal(err.as_ref()) {
        Some(
            ResilienceError::CircuitOpen { .. }
            | ResilienceError::NonRetryable(_)
            | ResilienceError::Cancelled
            | ResilienceError::NotFound(_),
        ) => return false,
        Some(ResilienceError::Timeout(_)) => return config.retry_on_timeout,
        _ => {}
    }
    if is_timeout(err) {
        return config.retry_on_timeout;
    }
    true
}

/// HTTP status policy: 408, 429, 502, 503 and 504 always; any other 5xx
/// only with `retry_on_5xx`.
pub fn http_status_should_retry(config: &RetryConfig, status: u16) -> bool {
    matches!(status, 408 | 429 | 502 | 503 | 504) || (config.retry_on_5xx && (500..600).contains(&status))
}

/// Registry of retry policies keyed by name, owned by the composition root.
pub struct RetryManager {
    store: Arc<dyn SharedStore>,
    retries: DashMap<String, Arc<Retry>>,
}

impl RetryManager {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            retries: DashMap::new(),
        }
    }

    /// Return the policy for `name`, creating it with `config` on first use.
    pub fn get_or_create(&self, name: &str, config: &RetryConfig) -> Arc<Retry> {
        self.retries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Retry::new(name, config.clone(), self.store.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Retry>> {
        self.retries.get(name).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.retries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retries.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<Retry>> {
        let mut retries: Vec<_> = self.retries.iter().map(|r| r.value().clone()).collect();
        retries.sort_by(|a, b| a.name.cmp(&b.name));
        retries
    }

    /// Metrics for every policy whose counters could be read.
    pub async fn all_metrics(&self) -> Vec<RetryMetrics> {
        let mut out = Vec::new();
        for retry in self.snapshot() {
            match retry.metrics().await {
                Ok(m) => out.push(m),
                Err(e) => tracing::warn!(policy = %retry.name, error = %e, "Failed to read retry metrics"),
            }
        }
        out
    }

    pub async fn reset_all(&self) -> Result<(), StoreError> {
        for retry in self.snapshot() {
            retry.reset().await?;
        }
        Ok(())
    }
}
