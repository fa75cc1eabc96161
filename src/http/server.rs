//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Hold the shared application state handed to every handler
//! - Compose the query middleware chain in its fixed order
//! - Mount the health and admin endpoints
//! - Wire up tower layers (tracing, request ID, request timeout)
//! - Serve with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::uri::InvalidUri,
    middleware::from_fn_with_state,
    routing::{post, MethodRouter},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::admin_routes;
use crate::cache::{QueryCache, SchemaCache};
use crate::config::GatewayConfig;
use crate::health::health_routes;
use crate::http::middleware::{cache_middleware, resilience_middleware};
use crate::http::upstream::{query_handler, UpstreamClient};
use crate::poller::SubgraphRegistry;
use crate::resilience::{CircuitBreakerManager, RetryManager};
use crate::security::{rate_limit_middleware, RateLimiter};
use crate::store::SharedStore;

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<dyn SharedStore>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub retries: Arc<RetryManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub query_cache: Arc<QueryCache>,
    pub schema_cache: Arc<SchemaCache>,
    pub subgraphs: Arc<SubgraphRegistry>,
    pub upstream: UpstreamClient,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build every store-backed component around one shared store.
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn SharedStore>,
        shutdown: CancellationToken,
    ) -> Result<Self, InvalidUri> {
        let upstream = UpstreamClient::new(&config.upstream.url, config.timeouts.upstream())?;
        Ok(Self {
            breakers: Arc::new(CircuitBreakerManager::new(store.clone())),
            retries: Arc::new(RetryManager::new(store.clone())),
            rate_limiter: Arc::new(RateLimiter::new(store.clone())),
            query_cache: Arc::new(QueryCache::new(
                store.clone(),
                config.cache.query_ttl(),
                config.cache.refresh_on_hit,
            )),
            schema_cache: Arc::new(SchemaCache::new(store.clone(), config.cache.schema_ttl())),
            subgraphs: Arc::new(SubgraphRegistry::new()),
            upstream,
            store,
            shutdown,
            config: Arc::new(config),
        })
    }
}

/// Router with the upstream forwarder behind the query chain.
pub fn build_router(state: AppState) -> Router {
    build_router_with(state, post(query_handler))
}

/// Router with a caller-supplied query handler behind the query chain.
#[allow(deprecated)]
pub fn build_router_with(state: AppState, query_handler: MethodRouter<AppState>) -> Router {
    let config = state.config.clone();

    // Layers run outermost-last: resilience → rate limit → cache → handler.
    let query = Router::new()
        .route(&config.listener.query_path, query_handler)
        .route_layer(from_fn_with_state(state.clone(), cache_middleware))
        .route_layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .route_layer(from_fn_with_state(state.clone(), resilience_middleware));

    let mut router = Router::new().merge(query).merge(health_routes());
    if config.admin.enabled {
        router = router.merge(admin_routes(state.clone()));
    }

    router.with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(config.timeouts.request())),
    )
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: Arc<GatewayConfig>,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let config = state.config.clone();
        let router = build_router(state);
        Self { router, config }
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            query_path = %self.config.listener.query_path,
            admin = self.config.admin.enabled,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
