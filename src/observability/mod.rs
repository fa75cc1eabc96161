//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for aggregation)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems via the `x-request-id` header
//! - Metric updates are fire-and-forget; without an installed recorder they are no-ops
//! - Log level comes from `RUST_LOG` first, then config

pub mod logging;
pub mod metrics;
