//! Federated schema discovery.
//!
//! # Data Flow
//! ```text
//! DatasourcePoller (one background task)
//!     → every interval, per configured service (fanned out, joined):
//!         → SchemaCache hit? use it
//!         → else sdl.rs fetch wrapped in Retry → CircuitBreaker
//!         → else fallback schema file, else drop the service this cycle
//!     → observer.rs (every registered SubgraphObserver gets the full set)
//! ```
//!
//! # Design Decisions
//! - The poller knows nothing about query execution; observers decide what
//!   a new subgraph set means
//! - Fallback schemas are never written to the cache, so the next cycle
//!   retries the live endpoint
//! - A cycle that loads no service at all leaves observers untouched

pub mod datasource;
pub mod observer;
pub mod sdl;

pub use datasource::DatasourcePoller;
pub use observer::{SubgraphConfig, SubgraphObserver, SubgraphRegistry};
pub use sdl::{fetch_sdl, SchemaFetchError};
