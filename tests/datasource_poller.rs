//! Datasource poller against mock subgraphs.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use resilient_gateway::cache::SchemaCache;
use resilient_gateway::config::{
    CircuitBreakerConfig, FetchMethod, PollerConfig, ResponseType, RetryConfig, ServiceConfig,
};
use resilient_gateway::poller::{DatasourcePoller, SubgraphObserver, SubgraphRegistry};
use resilient_gateway::resilience::{CircuitBreakerManager, RetryManager};
use resilient_gateway::store::{MemoryStore, SharedStore};

mod common;

const ORDERS_SDL: &str = "type Query { orders: [Order] } type Order @key(fields: \"id\") { id: ID! }";

struct Harness {
    store: Arc<MemoryStore>,
    schema_cache: Arc<SchemaCache>,
    breakers: Arc<CircuitBreakerManager>,
    retries: Arc<RetryManager>,
    registry: Arc<SubgraphRegistry>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn SharedStore> = store.clone();
        Self {
            schema_cache: Arc::new(SchemaCache::new(shared.clone(), Duration::from_secs(300))),
            breakers: Arc::new(CircuitBreakerManager::new(shared.clone())),
            retries: Arc::new(RetryManager::new(shared)),
            registry: Arc::new(SubgraphRegistry::new()),
            store,
        }
    }

    fn poller(&self, services: Vec<ServiceConfig>, breaker: CircuitBreakerConfig) -> DatasourcePoller {
        self.poller_every(0, services, breaker)
    }

    fn poller_every(
        &self,
        interval_secs: u64,
        services: Vec<ServiceConfig>,
        breaker: CircuitBreakerConfig,
    ) -> DatasourcePoller {
        let config = PollerConfig {
            enabled: true,
            interval_secs,
            fetch_timeout_secs: 2,
            services,
        };
        let retry = RetryConfig {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            ..RetryConfig::subgraph_default()
        };
        let mut poller = DatasourcePoller::new(
            config,
            breaker,
            retry,
            self.schema_cache.clone(),
            self.breakers.clone(),
            self.retries.clone(),
        )
        .unwrap();
        poller.register(self.registry.clone());
        poller
    }
}

fn service(name: &str, addr: SocketAddr) -> ServiceConfig {
    ServiceConfig {
        name: name.into(),
        url: format!("http://{addr}/query"),
        schema_url: None,
        ws_url: Some(format!("ws://{addr}/query")),
        method: FetchMethod::Post,
        response_type: ResponseType::Introspection,
        fallback_schema_path: None,
    }
}

async fn introspection_subgraph(calls: Arc<AtomicU32>) -> SocketAddr {
    common::start_programmable_backend(move |req| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.method, "POST");
            assert!(req.body.contains("__ApolloGetServiceDefinition__"));
            let body = serde_json::json!({"data": {"_service": {"sdl": ORDERS_SDL}}});
            (200, body.to_string())
        }
    })
    .await
}

#[tokio::test]
async fn test_fetches_caches_and_notifies() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = introspection_subgraph(calls.clone()).await;
    let harness = Harness::new();
    let poller = harness.poller(vec![service("orders", addr)], CircuitBreakerConfig::subgraph_default());

    let loaded = poller.refresh(&CancellationToken::new()).await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].sdl, ORDERS_SDL);
    assert_eq!(loaded[0].subscription_url.as_deref(), Some(format!("ws://{addr}/query").as_str()));

    let snapshot = harness.registry.snapshot();
    assert_eq!(snapshot.subgraphs.len(), 1);
    assert_eq!(snapshot.subgraphs[0].name, "orders");

    assert_eq!(
        harness.schema_cache.get_schema("orders").await.unwrap().as_deref(),
        Some(ORDERS_SDL)
    );
    assert!(harness.schema_cache.is_healthy("orders").await.unwrap());
    assert!(harness.store.get("gql:subgraph:status:orders").await.unwrap().is_some());

    // The second cycle is served from the schema cache.
    poller.refresh(&CancellationToken::new()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_string_response() {
    let addr = common::start_programmable_backend(|req| async move {
        assert_eq!(req.method, "GET");
        (200, ORDERS_SDL.to_string())
    })
    .await;

    let mut svc = service("orders", addr);
    svc.method = FetchMethod::Get;
    svc.response_type = ResponseType::String;
    svc.schema_url = Some(format!("http://{addr}/schema.graphql"));

    let harness = Harness::new();
    let poller = harness.poller(vec![svc], CircuitBreakerConfig::subgraph_default());
    let loaded = poller.refresh(&CancellationToken::new()).await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].sdl, ORDERS_SDL);
}

#[tokio::test]
async fn test_introspection_errors_use_fallback() {
    let addr = common::start_programmable_backend(|_req| async move {
        (200, r#"{"data":null,"errors":[{"message":"schema unavailable"}]}"#.to_string())
    })
    .await;

    let mut fallback = tempfile::NamedTempFile::new().unwrap();
    write!(fallback, "{ORDERS_SDL}").unwrap();

    let mut svc = service("orders", addr);
    svc.fallback_schema_path = Some(fallback.path().to_path_buf());

    let harness = Harness::new();
    let poller = harness.poller(vec![svc], CircuitBreakerConfig::subgraph_default());
    let loaded = poller.refresh(&CancellationToken::new()).await;

    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].sdl, ORDERS_SDL);
    assert!(!harness.schema_cache.is_healthy("orders").await.unwrap());
    // Fallback schemas are not cached.
    assert_eq!(harness.schema_cache.get_schema("orders").await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_service_is_dropped() {
    let good_calls = Arc::new(AtomicU32::new(0));
    let good = introspection_subgraph(good_calls).await;
    let bad = common::start_programmable_backend(|_req| async move { (503, "{}".to_string()) }).await;

    let harness = Harness::new();
    let poller = harness.poller(
        vec![service("orders", good), service("inventory", bad)],
        CircuitBreakerConfig::subgraph_default(),
    );
    let loaded = poller.refresh(&CancellationToken::new()).await;

    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, "orders");
    assert_eq!(harness.registry.snapshot().subgraphs.len(), 1);
    assert!(!harness.schema_cache.is_healthy("inventory").await.unwrap());
}

#[tokio::test]
async fn test_no_schemas_keeps_previous_set() {
    let bad = common::start_programmable_backend(|_req| async move { (503, "{}".to_string()) }).await;
    let harness = Harness::new();
    harness.registry.update_subgraphs(&[resilient_gateway::poller::SubgraphConfig {
        name: "previous".into(),
        url: "http://previous/query".into(),
        subscription_url: None,
        sdl: ORDERS_SDL.into(),
    }]);

    let poller = harness.poller(vec![service("orders", bad)], CircuitBreakerConfig::subgraph_default());
    assert!(poller.refresh(&CancellationToken::new()).await.is_empty());
    assert_eq!(harness.registry.snapshot().subgraphs[0].name, "previous");
}

#[tokio::test]
async fn test_open_circuit_stops_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let addr = common::start_programmable_backend(move |_req| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            (500, "{}".to_string())
        }
    })
    .await;

    let breaker = CircuitBreakerConfig {
        max_failures: 1,
        ..CircuitBreakerConfig::subgraph_default()
    };
    let harness = Harness::new();
    let poller = harness.poller(vec![service("orders", addr)], breaker);
    assert!(poller.refresh(&CancellationToken::new()).await.is_empty());

    // First attempt trips the breaker; the second sees it open and stops.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let metrics = harness.breakers.get("subgraph-orders").unwrap().metrics().await;
    assert_eq!(metrics.state.as_str(), "open");
}

#[tokio::test]
async fn test_missing_endpoint_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let addr = common::start_programmable_backend(move |_req| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            (404, "{}".to_string())
        }
    })
    .await;

    let harness = Harness::new();
    let poller = harness.poller(vec![service("orders", addr)], CircuitBreakerConfig::subgraph_default());
    assert!(poller.refresh(&CancellationToken::new()).await.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_once_with_zero_interval() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = introspection_subgraph(calls.clone()).await;
    let harness = Harness::new();
    let poller = harness.poller(vec![service("orders", addr)], CircuitBreakerConfig::subgraph_default());

    tokio::time::timeout(Duration::from_secs(5), poller.run(CancellationToken::new()))
        .await
        .expect("zero interval should return after one refresh");
    assert_eq!(harness.registry.snapshot().subgraphs.len(), 1);
}

#[tokio::test]
async fn test_interval_refreshes_until_cancelled() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = introspection_subgraph(calls.clone()).await;
    let harness = Harness::new();
    let poller = harness.poller_every(1, vec![service("orders", addr)], CircuitBreakerConfig::subgraph_default());

    let cancel = CancellationToken::new();
    let task = tokio::spawn(poller.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let first = harness.registry.snapshot().updated_at.expect("initial refresh");

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let second = harness.registry.snapshot().updated_at.expect("tick refresh");
    assert!(second > first);
    // The tick is served from the schema cache.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("poller should stop on cancel")
        .unwrap();
}
