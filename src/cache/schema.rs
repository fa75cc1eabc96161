//! Federated schema documents and subgraph health records.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::metrics;
use crate::store::{keys, SharedStore, StoreError};

/// Lifetime of a subgraph health record.
pub const SUBGRAPH_STATUS_TTL: Duration = Duration::from_secs(60);

/// Last observed health of one subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphStatus {
    pub healthy: bool,
    /// Unix seconds of the check.
    pub last_check: i64,
    pub service_name: String,
}

pub struct SchemaCache {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Cached schema for a service; empty documents count as a miss.
    pub async fn get_schema(&self, service: &str) -> Result<Option<String>, StoreError> {
        let cached = self
            .store
            .get(&schema_key(service))
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .filter(|sdl| !sdl.is_empty());
        metrics::record_cache_lookup("schema", if cached.is_some() { "hit" } else { "miss" });
        Ok(cached)
    }

    pub async fn cache_schema(&self, service: &str, sdl: &str) -> Result<(), StoreError> {
        self.store
            .set(&schema_key(service), sdl.as_bytes().to_vec(), Some(self.ttl))
            .await
    }

    pub async fn set_subgraph_status(&self, service: &str, healthy: bool) -> Result<(), StoreError> {
        let status = SubgraphStatus {
            healthy,
            last_check: chrono::Utc::now().timestamp(),
            service_name: service.to_string(),
        };
        let data = serde_json::to_vec(&status)
            .map_err(|e| StoreError::UnexpectedReply(format!("encode subgraph status: {e}")))?;
        self.store
            .set(&status_key(service), data, Some(SUBGRAPH_STATUS_TTL))
            .await
    }

    pub async fn subgraph_status(&self, service: &str) -> Result<Option<SubgraphStatus>, StoreError> {
        match self.store.get(&status_key(service)).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::UnexpectedReply(format!("invalid subgraph status: {e}"))),
        }
    }

    /// Health of a subgraph; no record means healthy.
    pub async fn is_healthy(&self, service: &str) -> Result<bool, StoreError> {
        Ok(self.subgraph_status(service).await?.map_or(true, |s| s.healthy))
    }
}

fn schema_key(service: &str) -> String {
    format!("{}{}", keys::SCHEMA_CACHE_PREFIX, service)
}

fn status_key(service: &str) -> String {
    format!("{}{}", keys::SUBGRAPH_STATUS_PREFIX, service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_schema_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let cache = SchemaCache::new(store.clone(), Duration::from_secs(300));

        assert_eq!(cache.get_schema("orders").await.unwrap(), None);
        cache.cache_schema("orders", "type Query { orders: [Order] }").await.unwrap();
        assert_eq!(
            cache.get_schema("orders").await.unwrap().as_deref(),
            Some("type Query { orders: [Order] }")
        );
        assert!(store.ttl("gql:schema:orders").unwrap() <= Duration::from_secs(300));

        cache.cache_schema("empty", "").await.unwrap();
        assert_eq!(cache.get_schema("empty").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subgraph_status() {
        let store = Arc::new(MemoryStore::new());
        let cache = SchemaCache::new(store.clone(), Duration::from_secs(300));

        assert!(cache.is_healthy("inventory").await.unwrap());
        cache.set_subgraph_status("inventory", false).await.unwrap();
        assert!(!cache.is_healthy("inventory").await.unwrap());

        let raw = store.get("gql:subgraph:status:inventory").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["serviceName"], "inventory");
        assert_eq!(json["healthy"], false);
        assert!(json["lastCheck"].is_i64());
        assert!(store.ttl("gql:subgraph:status:inventory").unwrap() <= SUBGRAPH_STATUS_TTL);
    }

    #[tokio::test]
    async fn test_corrupt_status_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("gql:subgraph:status:x", b"not json".to_vec(), None)
            .await
            .unwrap();
        let cache = SchemaCache::new(store, Duration::from_secs(300));
        assert!(cache.subgraph_status("x").await.is_err());
    }
}
