//! Startup orchestration.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::{GatewayConfig, StoreBackend};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::signals::shutdown_signal;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::poller::DatasourcePoller;
use crate::store::{MemoryStore, RedisStore, SharedStore};

pub type StartupError = Box<dyn std::error::Error + Send + Sync>;

/// Connect the configured store backend.
pub async fn connect_store(config: &GatewayConfig) -> Result<Arc<dyn SharedStore>, StartupError> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.url, config.store.op_timeout()).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-process store; state is not shared between replicas");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Start every subsystem and serve until a shutdown signal arrives.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = connect_store(&config).await?;
    let shutdown = Shutdown::new();
    let state = AppState::new(config, store, shutdown.token())?;

    if state.config.poller.enabled && !state.config.poller.services.is_empty() {
        let mut poller = DatasourcePoller::new(
            state.config.poller.clone(),
            state.config.circuit_breaker.subgraph.clone(),
            state.config.retries.subgraph.clone(),
            state.schema_cache.clone(),
            state.breakers.clone(),
            state.retries.clone(),
        )?;
        poller.register(state.subgraphs.clone());
        tokio::spawn(poller.run(shutdown.child_token()));
    }

    let listener = TcpListener::bind(&state.config.listener.bind_address).await?;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    HttpServer::new(state).run(listener, shutdown.token()).await?;
    Ok(())
}
