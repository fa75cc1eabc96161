//! Resilient GraphQL Gateway Library
//!
//! Circuit breaking, retries, rate limiting and response caching in front of
//! a federated GraphQL execution engine, with every decision coordinated
//! through a shared store so all replicas agree.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod store;

// Traffic management
pub mod cache;
pub mod poller;
pub mod resilience;
pub mod security;

// Cross-cutting concerns
pub mod admin;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
