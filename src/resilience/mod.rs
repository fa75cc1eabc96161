//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Protected call:
//!     → retries.rs (bounded attempts, backoff.rs delays, cancellation)
//!         → circuit_breaker.rs (fail fast while the service is down)
//!             → action (upstream request, schema fetch)
//! ```
//!
//! # Design Decisions
//! - Retry wraps the breaker so every attempt is still subject to breaker accounting
//! - Breaker and retry state are shared through the store across replicas
//! - Registries are explicit objects owned by the composition root, not globals
//! - Signals (`CircuitOpen`, `TooManyRequests`, ...) are typed errors, never panics

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerManager, CircuitBreakerMetrics, CircuitState};
pub use retries::{default_should_retry, http_status_should_retry, Retry, RetryManager, RetryMetrics};
