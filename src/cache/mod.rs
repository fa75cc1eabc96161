//! Response and schema caching.
//!
//! # Data Flow
//! ```text
//! POST /query
//!     → query.rs (fingerprint, skip mutations, GET/SET gql:query:<sha256>)
//!
//! Datasource poller
//!     → schema.rs (gql:schema:<service>, gql:subgraph:status:<service>)
//! ```
//!
//! # Design Decisions
//! - The cache is a pure accelerator: any store error degrades to a miss
//! - Only complete 200 responses with a body are stored, in one atomic SET
//! - Query and schema TTLs default to the same value so a schema refresh
//!   and query expiry stay loosely in step

pub mod query;
pub mod schema;

pub use query::{GraphQLRequest, QueryCache};
pub use schema::{SchemaCache, SubgraphStatus};
