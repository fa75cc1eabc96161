//! Circuit breaker backed by the shared store.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= max_failures
//! Open → Half-Open: open_timeout elapsed since opened_at
//! Half-Open → Closed: max_half_open_probes probes succeed
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - State lives in the store so every replica sees the same circuit
//! - Reads go through a short local cache; writes always hit the store
//! - Store unreachable while reading state: fail open and run the action
//! - Half-open probe slots are reserved with INCR before the probe runs

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::error::{BoxError, ResilienceError};
use crate::observability::metrics;
use crate::store::{keys, Pipeline, SharedStore, StoreError};

/// How long a state read from the store is trusted locally.
pub const DEFAULT_STATE_CHECK_TTL: Duration = Duration::from_secs(1);

/// Breaker state as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half-open" => Ok(CircuitState::HalfOpen),
            other => Err(format!("unknown circuit state '{other}'")),
        }
    }
}

/// Point-in-time view of one breaker, as served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub max_failures: u32,
    pub timeout_sec: f64,
    pub failure_rate_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct CachedState {
    state: CircuitState,
    checked_at: Instant,
}

/// A named circuit breaker whose state is shared through the store.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn SharedStore>,
    cached: RwLock<Option<CachedState>>,
    state_check_ttl: Duration,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, store: Arc<dyn SharedStore>) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            cached: RwLock::new(None),
            state_check_ttl: DEFAULT_STATE_CHECK_TTL,
        }
    }

    /// Override the local state cache freshness window.
    pub fn with_state_check_ttl(mut self, ttl: Duration) -> Self {
        self.state_check_ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `action` if the circuit allows it.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] or
    /// [`ResilienceError::TooManyRequests`] without invoking the action when
    /// the circuit rejects the call; otherwise the action's own result.
    pub async fn execute<T, F, Fut>(&self, action: F) -> Result<T, BoxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let state = match self.state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(breaker = %self.name, error = %e, "Circuit state unavailable, failing open");
                return action().await;
            }
        };

        match state {
            CircuitState::Closed => self.execute_closed(action).await,
            CircuitState::HalfOpen => self.execute_half_open(action).await,
            CircuitState::Open => {
                if self.cooldown_elapsed().await {
                    self.transition(CircuitState::HalfOpen).await;
                    self.execute_half_open(action).await
                } else {
                    Err(ResilienceError::CircuitOpen { name: self.name.clone() }.boxed())
                }
            }
        }
    }

    async fn execute_closed<T, F, Fut>(&self, action: F) -> Result<T, BoxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        match action().await {
            Ok(value) => {
                if let Err(e) = self
                    .store
                    .del(vec![self.key("failures"), self.key("last_failure")])
                    .await
                {
                    tracing::warn!(breaker = %self.name, error = %e, "Failed to reset failure count");
                }
                Ok(value)
            }
            Err(err) => {
                match self.record_failure().await {
                    Ok(failures) if failures >= i64::from(self.config.max_failures) => {
                        tracing::warn!(breaker = %self.name, failures, "Circuit breaker opening");
                        self.transition(CircuitState::Open).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(breaker = %self.name, error = %e, "Failed to record failure");
                    }
                }
                Err(err)
            }
        }
    }

    async fn execute_half_open<T, F, Fut>(&self, action: F) -> Result<T, BoxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let slot = match self
            .store
            .incr_with_ttl(&self.key("success"), self.config.open_timeout())
            .await
        {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(breaker = %self.name, error = %e, "Probe slot unavailable, failing open");
                return action().await;
            }
        };

        let max_probes = i64::from(self.config.max_half_open_probes);
        if slot > max_probes {
            return Err(ResilienceError::TooManyRequests { name: self.name.clone() }.boxed());
        }

        match action().await {
            Ok(value) => {
                // Holding the last reserved slot is enough; earlier probes may still be in flight.
                if slot >= max_probes {
                    tracing::info!(breaker = %self.name, probes = slot, "Circuit breaker closing");
                    self.transition(CircuitState::Closed).await;
                }
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(breaker = %self.name, "Circuit breaker reopening after failed probe");
                if let Err(e) = self.record_failure().await {
                    tracing::warn!(breaker = %self.name, error = %e, "Failed to record failure");
                }
                self.transition(CircuitState::Open).await;
                Err(err)
            }
        }
    }

    /// Current state, served from the local cache while it is fresh.
    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        let cached = *self.cached.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cached {
            if cached.checked_at.elapsed() < self.state_check_ttl {
                return Ok(cached.state);
            }
        }

        let state = match self.store.get(&self.key("state")).await? {
            None => CircuitState::Closed,
            Some(raw) => String::from_utf8_lossy(&raw)
                .parse()
                .unwrap_or(CircuitState::Closed),
        };
        self.remember(state);
        Ok(state)
    }

    pub async fn failure_count(&self) -> Result<u32, StoreError> {
        self.counter("failures").await
    }

    /// Successful (or reserved) half-open probes.
    pub async fn success_count(&self) -> Result<u32, StoreError> {
        self.counter("success").await
    }

    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state().await.unwrap_or(CircuitState::Closed);
        let failure_count = self.failure_count().await.unwrap_or(0);
        let success_count = self.success_count().await.unwrap_or(0);

        let opened_at = if state == CircuitState::Closed {
            None
        } else {
            self.store
                .get_int(&self.key("opened_at"))
                .await
                .ok()
                .flatten()
                .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
                .map(|t| t.to_rfc3339())
        };

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state,
            failure_count,
            success_count,
            max_failures: self.config.max_failures,
            timeout_sec: self.config.open_timeout().as_secs_f64(),
            failure_rate_threshold: self.config.failure_rate_threshold,
            opened_at,
        }
    }

    /// Force the breaker closed and clear every counter.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.write_transition(CircuitState::Closed).await?;
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
        Ok(())
    }

    async fn counter(&self, suffix: &str) -> Result<u32, StoreError> {
        let value = self.store.get_int(&self.key(suffix)).await?.unwrap_or(0);
        Ok(u32::try_from(value.max(0)).unwrap_or(u32::MAX))
    }

    /// Increment the failure counter and stamp the failure time atomically.
    async fn record_failure(&self) -> Result<i64, StoreError> {
        let window = self.config.failure_reset_window();
        let failures_key = self.key("failures");
        let replies = self
            .store
            .exec(
                Pipeline::new()
                    .incr(failures_key.clone())
                    .expire(failures_key.clone(), window)
                    .set(self.key("last_failure"), now_millis().to_string(), Some(window)),
            )
            .await?;
        replies
            .first()
            .and_then(|r| r.as_int())
            .ok_or_else(|| StoreError::UnexpectedReply(format!("INCR {failures_key}")))
    }

    /// True when the open cooldown has elapsed, or when it cannot be determined.
    async fn cooldown_elapsed(&self) -> bool {
        match self.store.get_int(&self.key("opened_at")).await {
            Ok(Some(opened_at)) => {
                let elapsed = now_millis().saturating_sub(opened_at);
                elapsed >= i64::try_from(self.config.open_timeout_ms).unwrap_or(i64::MAX)
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(breaker = %self.name, error = %e, "Failed to read opened_at");
                true
            }
        }
    }

    async fn transition(&self, to: CircuitState) {
        if let Err(e) = self.write_transition(to).await {
            tracing::error!(breaker = %self.name, to = %to, error = %e, "Failed to persist circuit state");
        }
    }

    async fn write_transition(&self, to: CircuitState) -> Result<(), StoreError> {
        let ttl = self.config.open_timeout() * 2;
        let pipeline = Pipeline::new().set(self.key("state"), to.as_str(), Some(ttl));
        let pipeline = match to {
            CircuitState::Open => pipeline
                .set(self.key("opened_at"), now_millis().to_string(), Some(ttl))
                .del(vec![self.key("success")]),
            // Probe slots reserved by other replicas must survive this write.
            CircuitState::HalfOpen => pipeline,
            CircuitState::Closed => pipeline.del(vec![
                self.key("failures"),
                self.key("last_failure"),
                self.key("success"),
                self.key("opened_at"),
            ]),
        };
        self.store.exec(pipeline).await?;

        self.remember(to);
        metrics::record_circuit_transition(&self.name, to.as_str());
        tracing::debug!(breaker = %self.name, to = %to, "Circuit state changed");
        Ok(())
    }

    fn remember(&self, state: CircuitState) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(CachedState {
            state,
            checked_at: Instant::now(),
        });
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{}:{}", keys::CIRCUIT_PREFIX, self.name, suffix)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Registry of breakers keyed by service name, owned by the composition root.
pub struct CircuitBreakerManager {
    store: Arc<dyn SharedStore>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            breakers: DashMap::new(),
        }
    }

    /// Return the breaker for `name`, creating it with `config` on first use.
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone(), self.store.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut breakers: Vec<_> = self.breakers.iter().map(|b| b.value().clone()).collect();
        breakers.sort_by(|a, b| a.name.cmp(&b.name));
        breakers
    }

    pub async fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut out = Vec::new();
        for breaker in self.snapshot() {
            out.push(breaker.metrics().await);
        }
        out
    }

    /// Reset every registered breaker, returning the first failure after trying all.
    pub async fn reset_all(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for breaker in self.snapshot() {
            if let Err(e) = breaker.reset().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
