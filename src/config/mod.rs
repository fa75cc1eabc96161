//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → presets handed explicitly to breakers, retries, limiter, caches
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Breaker and retry settings are named presets built once, never ad hoc
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerPresets, CacheConfig, CircuitBreakerConfig, FetchMethod, GatewayConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, PollerConfig, RateLimitConfig, ResponseType,
    RetryConfig, RetryPresets, ServiceConfig, StoreBackend, StoreConfig, TimeoutConfig,
    UpstreamConfig,
};
