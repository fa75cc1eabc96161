//! Resilient GraphQL Gateway
//!
//! ```text
//!                 ┌────────────────────────────────────────────────────┐
//!                 │                      GATEWAY                        │
//!   POST /query   │  ┌───────┐   ┌─────────┐   ┌───────┐   ┌───────┐    │
//!   ──────────────┼─▶│ retry │──▶│ circuit │──▶│ rate  │──▶│ cache │────┼──▶ execution
//!                 │  │       │   │ breaker │   │ limit │   │       │    │    engine
//!                 │  └───────┘   └─────────┘   └───────┘   └───────┘    │
//!                 │       │            │           │           │        │
//!                 │       └────────────┴─────┬─────┴───────────┘        │
//!                 │                          ▼                          │
//!                 │                   shared store (Redis)              │
//!                 │                          ▲                          │
//!                 │   datasource poller ─────┘ (schemas, subgraph status)│
//!                 └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use resilient_gateway::config::{load_config, GatewayConfig};
use resilient_gateway::lifecycle::startup;
use resilient_gateway::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "resilient-gateway", version, about = "Resilient GraphQL gateway")]
struct Cli {
    /// Path to the TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        store = ?config.store.backend,
        services = config.poller.services.len(),
        "resilient-gateway starting"
    );

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
