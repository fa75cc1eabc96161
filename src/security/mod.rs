//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (X-Forwarded-For → X-Real-IP → peer address)
//!     → rate_limit.rs (sliding window in the shared store)
//!     → Pass to the cache layer
//! ```
//!
//! # Design Decisions
//! - Limits are shared across replicas through the store
//! - Fail open: a store outage never blocks traffic
//! - Rejections are typed responses with GraphQL error bodies

pub mod identity;
pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimitDecision, RateLimiter};
