//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Shared key-value store connection.
    pub store: StoreConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Response and schema cache configuration.
    pub cache: CacheConfig,

    /// Circuit breaker presets.
    pub circuit_breaker: BreakerPresets,

    /// Retry presets.
    pub retries: RetryPresets,

    /// Federated schema refresh.
    pub poller: PollerConfig,

    /// Execution engine that `/query` is forwarded to.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Path of the GraphQL endpoint.
    pub query_path: String,

    /// Largest request body buffered by the query chain, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            query_path: "/query".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Which shared store implementation to use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// In-process store; state is not shared between replicas.
    Memory,
}

/// Shared store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Connection URL (redis:// or rediss://).
    pub url: String,

    /// Deadline for a single store round trip in milliseconds.
    pub op_timeout_ms: u64,
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            op_timeout_ms: 500,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Timeout for a single forwarded query in seconds.
    pub upstream_secs: u64,

    /// Timeout for the health endpoints' store reads in seconds.
    pub health_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_secs(self.upstream_secs)
    }

    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_secs: 10,
            health_secs: 5,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per identifier within one window.
    pub max_requests: u32,

    /// Sliding window length in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_secs: 60,
        }
    }
}

/// Response and schema cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the query response cache.
    pub enabled: bool,

    /// TTL of cached query responses in seconds.
    pub query_ttl_secs: u64,

    /// TTL of cached federated schema documents in seconds.
    /// Kept equal to `query_ttl_secs` by convention.
    pub schema_ttl_secs: u64,

    /// Re-arm the TTL of an entry whenever it is served.
    pub refresh_on_hit: bool,
}

impl CacheConfig {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            query_ttl_secs: 300,
            schema_ttl_secs: 300,
            refresh_on_hit: false,
        }
    }
}

/// Circuit breaker configuration for one named service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub max_failures: u32,

    /// How long an open circuit rejects calls before probing, in milliseconds.
    pub open_timeout_ms: u64,

    /// Probe calls allowed in half-open state; this many successes close the circuit.
    pub max_half_open_probes: u32,

    /// Lifetime of the failure counter in milliseconds.
    pub failure_reset_window_ms: u64,

    /// Failure percentage (0-100) reported alongside the breaker metrics.
    pub failure_rate_threshold: f64,
}

impl CircuitBreakerConfig {
    /// Preset for the gateway's own `/query` endpoint.
    pub fn gateway_default() -> Self {
        Self {
            max_failures: 5,
            open_timeout_ms: 60_000,
            max_half_open_probes: 3,
            failure_reset_window_ms: 30_000,
            failure_rate_threshold: 50.0,
        }
    }

    /// Preset for schema fetches against federated subgraphs.
    pub fn subgraph_default() -> Self {
        Self {
            max_failures: 3,
            open_timeout_ms: 30_000,
            max_half_open_probes: 2,
            failure_reset_window_ms: 20_000,
            failure_rate_threshold: 60.0,
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn failure_reset_window(&self) -> Duration {
        Duration::from_millis(self.failure_reset_window_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::gateway_default()
    }
}

/// Breaker presets constructed once and handed to the components that need them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerPresets {
    pub gateway: CircuitBreakerConfig,
    pub subgraph: CircuitBreakerConfig,
}

impl Default for BreakerPresets {
    fn default() -> Self {
        Self {
            gateway: CircuitBreakerConfig::gateway_default(),
            subgraph: CircuitBreakerConfig::subgraph_default(),
        }
    }
}

/// Retry configuration for one named policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound of any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Exponential growth factor.
    pub multiplier: f64,

    /// Fraction of the delay used as symmetric random jitter (0.0 - 1.0).
    pub jitter: f64,

    /// Retry errors caused by a per-attempt deadline.
    pub retry_on_timeout: bool,

    /// Retry any 5xx response, not only 502/503/504.
    pub retry_on_5xx: bool,
}

impl RetryConfig {
    /// Preset for the gateway's own `/query` endpoint.
    pub fn gateway_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: 0.1,
            retry_on_timeout: true,
            retry_on_5xx: true,
        }
    }

    /// Preset for schema fetches against federated subgraphs.
    pub fn subgraph_default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.1,
            retry_on_timeout: true,
            retry_on_5xx: true,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.1,
            retry_on_timeout: true,
            retry_on_5xx: true,
        }
    }
}

/// Retry presets constructed once and handed to the components that need them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPresets {
    pub gateway: RetryConfig,
    pub subgraph: RetryConfig,
}

impl Default for RetryPresets {
    fn default() -> Self {
        Self {
            gateway: RetryConfig::gateway_default(),
            subgraph: RetryConfig::subgraph_default(),
        }
    }
}

/// How a subgraph's schema endpoint is queried.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchMethod {
    Get,
    #[default]
    Post,
}

/// Shape of a subgraph's schema response.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// `{data:{_service:{sdl}}, errors?}`
    #[default]
    Introspection,
    /// The body is the schema document itself.
    String,
}

/// A federated upstream service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Unique service name; also the schema cache key.
    pub name: String,

    /// Query endpoint of the service.
    pub url: String,

    /// Schema endpoint; defaults to `url`.
    #[serde(default)]
    pub schema_url: Option<String>,

    /// Subscription (websocket) endpoint.
    #[serde(default)]
    pub ws_url: Option<String>,

    #[serde(default)]
    pub method: FetchMethod,

    #[serde(default)]
    pub response_type: ResponseType,

    /// Local schema document used when the live fetch fails.
    #[serde(default)]
    pub fallback_schema_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn schema_endpoint(&self) -> &str {
        self.schema_url.as_deref().unwrap_or(&self.url)
    }
}

/// Federated schema refresh configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Enable the background refresher.
    pub enabled: bool,

    /// Refresh interval in seconds; 0 refreshes once at startup.
    pub interval_secs: u64,

    /// Timeout for a single schema fetch in seconds.
    pub fetch_timeout_secs: u64,

    pub services: Vec<ServiceConfig>,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Schemas rarely change; matches the schema cache TTL.
            interval_secs: 300,
            fetch_timeout_secs: 10,
            services: Vec::new(),
        }
    }
}

/// Execution engine the gateway forwards queries to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4000/query".to_string(),
        }
    }
}

/// Log output flavour.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoints configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
