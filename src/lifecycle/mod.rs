//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Store → AppState → Poller task → Listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel root token → Stop accepting → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then store, then listeners
//! - Fail fast: any startup error is fatal
//! - One cancellation tree: request and poller tokens are children of the root

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
