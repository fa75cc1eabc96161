//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → middleware/ (resilience → rate limit → cache)
//!     → upstream.rs (forward to the execution engine)
//!     → capture.rs (buffered responses replayed by the chain)
//!     → errors.rs (GraphQL error bodies for gateway rejections)
//! ```

pub mod capture;
pub mod errors;
pub mod middleware;
pub mod server;
pub mod upstream;

pub use server::{build_router, build_router_with, AppState, HttpServer};
