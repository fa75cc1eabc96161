//! Background refresh of federated subgraph schemas.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::SchemaCache;
use crate::config::{CircuitBreakerConfig, PollerConfig, RetryConfig, ServiceConfig};
use crate::error::{is_circuit_open, BoxError};
use crate::observability::metrics;
use crate::poller::observer::{SubgraphConfig, SubgraphObserver};
use crate::poller::sdl::fetch_sdl;
use crate::resilience::{default_should_retry, CircuitBreakerManager, RetryManager};

/// Where a service's schema came from in one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSource {
    Cache,
    Network,
    Fallback,
}

impl SchemaSource {
    fn as_str(self) -> &'static str {
        match self {
            SchemaSource::Cache => "cache",
            SchemaSource::Network => "network",
            SchemaSource::Fallback => "fallback",
        }
    }
}

pub struct DatasourcePoller {
    config: PollerConfig,
    breaker_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    schema_cache: Arc<SchemaCache>,
    breakers: Arc<CircuitBreakerManager>,
    retries: Arc<RetryManager>,
    client: reqwest::Client,
    observers: Vec<Arc<dyn SubgraphObserver>>,
}

impl DatasourcePoller {
    /// Build a poller using the subgraph breaker and retry presets.
    pub fn new(
        config: PollerConfig,
        breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
        schema_cache: Arc<SchemaCache>,
        breakers: Arc<CircuitBreakerManager>,
        retries: Arc<RetryManager>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;
        Ok(Self {
            config,
            breaker_config,
            retry_config,
            schema_cache,
            breakers,
            retries,
            client,
            observers: Vec::new(),
        })
    }

    pub fn register(&mut self, observer: Arc<dyn SubgraphObserver>) {
        self.observers.push(observer);
    }

    /// Refresh now, then on every interval tick until cancelled.
    ///
    /// An interval of zero refreshes exactly once.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            services = self.config.services.len(),
            interval_secs = self.config.interval_secs,
            "Datasource poller starting"
        );
        self.refresh(&cancel).await;

        if self.config.interval_secs == 0 {
            return;
        }

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.refresh(&cancel).await;
                }
            }
        }
        tracing::info!("Datasource poller stopped");
    }

    /// Load every service concurrently and notify observers with the result.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Vec<SubgraphConfig> {
        let loaded = join_all(
            self.config
                .services
                .iter()
                .map(|service| self.load_service(service, cancel)),
        )
        .await;
        let subgraphs: Vec<SubgraphConfig> = loaded.into_iter().flatten().collect();

        metrics::set_subgraphs_available(subgraphs.len());
        if subgraphs.is_empty() {
            tracing::warn!("No subgraph schema available, keeping previous configuration");
            return subgraphs;
        }

        for observer in &self.observers {
            observer.update_subgraphs(&subgraphs);
        }
        subgraphs
    }

    async fn load_service(&self, service: &ServiceConfig, cancel: &CancellationToken) -> Option<SubgraphConfig> {
        let (sdl, source) = match self.resolve_schema(service, cancel).await {
            Some(found) => found,
            None => {
                metrics::record_schema_refresh(&service.name, "unavailable");
                tracing::error!(service = %service.name, "Dropping service from this refresh");
                return None;
            }
        };

        metrics::record_schema_refresh(&service.name, source.as_str());
        tracing::debug!(service = %service.name, source = source.as_str(), "Schema loaded");

        Some(SubgraphConfig {
            name: service.name.clone(),
            url: service.url.clone(),
            subscription_url: service.ws_url.clone(),
            sdl,
        })
    }

    async fn resolve_schema(
        &self,
        service: &ServiceConfig,
        cancel: &CancellationToken,
    ) -> Option<(String, SchemaSource)> {
        match self.schema_cache.get_schema(&service.name).await {
            Ok(Some(sdl)) => return Some((sdl, SchemaSource::Cache)),
            Ok(None) => {}
            Err(e) => tracing::warn!(service = %service.name, error = %e, "Schema cache unavailable"),
        }

        match self.fetch_with_resilience(service, cancel).await {
            Ok(sdl) => {
                if let Err(e) = self.schema_cache.cache_schema(&service.name, &sdl).await {
                    tracing::warn!(service = %service.name, error = %e, "Failed to cache schema");
                }
                self.record_status(service, true).await;
                Some((sdl, SchemaSource::Network))
            }
            Err(err) => {
                tracing::warn!(service = %service.name, error = %err, "Schema fetch failed");
                self.record_status(service, false).await;
                self.load_fallback(service).await.map(|sdl| (sdl, SchemaSource::Fallback))
            }
        }
    }

    /// Retry wraps the breaker; an open circuit ends the attempts at once.
    async fn fetch_with_resilience(&self, service: &ServiceConfig, cancel: &CancellationToken) -> Result<String, BoxError> {
        let name = format!("subgraph-{}", service.name);
        let breaker = self.breakers.get_or_create(&name, &self.breaker_config);
        let retry = self.retries.get_or_create(&name, &self.retry_config);
        let retry_config = retry.config();
        let timeout = self.config.fetch_timeout();
        let (breaker, client) = (breaker.as_ref(), &self.client);

        retry
            .execute_with_condition(
                cancel,
                move |_attempt| async move {
                    breaker
                        .execute(|| async move {
                            fetch_sdl(client, service)
                                .await
                                .map_err(|e| e.into_resilience(timeout))
                        })
                        .await
                },
                |err, _| {
                    if is_circuit_open(err) {
                        tracing::warn!(service = %service.name, "Circuit open, not retrying schema fetch");
                        return false;
                    }
                    default_should_retry(retry_config, err)
                },
            )
            .await
    }

    async fn load_fallback(&self, service: &ServiceConfig) -> Option<String> {
        let path = service.fallback_schema_path.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(sdl) if !sdl.trim().is_empty() => {
                tracing::info!(service = %service.name, path = %path.display(), "Using fallback schema");
                Some(sdl)
            }
            Ok(_) => {
                tracing::error!(service = %service.name, path = %path.display(), "Fallback schema is empty");
                None
            }
            Err(e) => {
                tracing::error!(service = %service.name, path = %path.display(), error = %e, "Failed to read fallback schema");
                None
            }
        }
    }

    async fn record_status(&self, service: &ServiceConfig, healthy: bool) {
        if let Err(e) = self.schema_cache.set_subgraph_status(&service.name, healthy).await {
            tracing::warn!(service = %service.name, error = %e, "Failed to record subgraph status");
        }
    }
}
