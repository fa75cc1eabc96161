//! Health and introspection endpoints.
//!
//! # Data Flow
//! ```text
//! GET /health                   → store ping
//! GET /health/circuit-breakers  → CircuitBreakerManager::all_metrics
//! GET /health/retries           → RetryManager::all_metrics
//! GET /health/subgraphs         → SubgraphRegistry snapshot + subgraph status records
//! ```
//!
//! # Design Decisions
//! - Every store read is bounded by `timeouts.health_secs`
//! - The breaker endpoint answers 503 while any breaker is open, so load
//!   balancers can route around a degraded replica
//! - The gateway stays up without its store, so `/health` reports a
//!   degraded store but still answers 200

pub mod endpoints;

pub use endpoints::health_routes;
