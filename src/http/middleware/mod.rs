//! Middleware wrapped around the query endpoint.
//!
//! # Data Flow
//! ```text
//! request
//!     → resilience.rs (retry, then circuit breaker, per attempt)
//!     → security::rate_limit (sliding window per client)
//!     → cache.rs (fingerprint lookup, short-circuits on HIT)
//!     → upstream query handler
//! ```
//!
//! # Design Decisions
//! - Retry sits above the breaker so every attempt is breaker-accounted
//! - Rate limiting and caching sit below the breaker: their outcomes are
//!   not 5xx and never count as failures
//! - The request body is buffered once at the outermost layer and replayed
//!   per attempt

pub mod cache;
pub mod resilience;

pub use cache::cache_middleware;
pub use resilience::resilience_middleware;
