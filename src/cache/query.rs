//! Fingerprinted cache of GraphQL query responses.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::observability::metrics;
use crate::store::{keys, SharedStore, StoreError};

/// The JSON body of a GraphQL POST.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GraphQLRequest {
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub variables: Option<serde_json::Value>,

    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    /// Operations starting with the `mutation` keyword (case-insensitive).
    pub fn is_mutation(&self) -> bool {
        is_mutation(&self.query)
    }
}

/// Heuristic mutation check on the operation text.
pub fn is_mutation(query: &str) -> bool {
    query
        .trim_start()
        .get(..8)
        .is_some_and(|head| head.eq_ignore_ascii_case("mutation"))
}

/// Hex SHA-256 over the whitespace-normalized query and its variables.
///
/// `serde_json` maps keep keys sorted, so variable order does not matter.
/// The operation name is appended when present, since it selects which
/// operation of a multi-operation document runs.
pub fn fingerprint(request: &GraphQLRequest) -> String {
    let query = request.query.split_whitespace().collect::<Vec<_>>().join(" ");
    let variables = match &request.variables {
        None | Some(serde_json::Value::Null) => "{}".to_string(),
        Some(v) => v.to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b":");
    hasher.update(variables.as_bytes());
    if let Some(name) = request.operation_name.as_deref().filter(|n| !n.is_empty()) {
        hasher.update(b":");
        hasher.update(name.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Query response cache backed by the shared store.
pub struct QueryCache {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    refresh_on_hit: bool,
}

impl QueryCache {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration, refresh_on_hit: bool) -> Self {
        Self {
            store,
            ttl,
            refresh_on_hit,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store key for a request.
    pub fn key_for(&self, request: &GraphQLRequest) -> String {
        format!("{}{}", keys::QUERY_CACHE_PREFIX, fingerprint(request))
    }

    /// Look up a cached response; `None` is a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cached = self.store.get(key).await;
        match &cached {
            Ok(Some(_)) => {
                metrics::record_cache_lookup("query", "hit");
                tracing::debug!(key, "Cache hit");
                if self.refresh_on_hit {
                    if let Err(e) = self.store.expire(key, self.ttl).await {
                        tracing::warn!(key, error = %e, "Failed to refresh cache TTL");
                    }
                }
            }
            Ok(None) => {
                metrics::record_cache_lookup("query", "miss");
                tracing::debug!(key, "Cache miss");
            }
            Err(_) => metrics::record_cache_lookup("query", "error"),
        }
        cached
    }

    /// Store a response under `key` with the given TTL (the configured one when `None`).
    pub async fn set(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let ttl = ttl.unwrap_or(self.ttl);
        let size = data.len();
        self.store.set(key, data, Some(ttl)).await?;
        tracing::debug!(key, size, ttl = ?ttl, "Cache set");
        Ok(())
    }

    /// Delete every key matching a glob pattern, returning how many were removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<i64, StoreError> {
        let keys = self.store.scan(pattern).await?;
        let removed = self.store.del(keys).await?;
        tracing::info!(pattern, removed, "Cache invalidated");
        Ok(removed)
    }
}

/// Short form of a cache key for the `X-Cache-Key` header.
pub fn display_key(key: &str) -> String {
    let fingerprint = key.strip_prefix(keys::QUERY_CACHE_PREFIX).unwrap_or(key);
    let end = fingerprint
        .char_indices()
        .nth(16)
        .map_or(fingerprint.len(), |(i, _)| i);
    format!("{}...", &fingerprint[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn request(query: &str, variables: serde_json::Value) -> GraphQLRequest {
        GraphQLRequest {
            query: query.into(),
            variables: Some(variables),
            operation_name: None,
        }
    }

    #[test]
    fn test_mutation_detection() {
        assert!(is_mutation("mutation { addOrder { id } }"));
        assert!(is_mutation("  \n MUTATION AddOrder { x }"));
        assert!(!is_mutation("query { orders { id } }"));
        assert!(!is_mutation("{ orders { id } }"));
        assert!(!is_mutation("mut"));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = request("query  {\n orders { id } }", json!({"b": 1, "a": 2}));
        let b = request("query { orders { id } }", json!({"a": 2, "b": 1}));
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);

        let c = request("query { orders { id } }", json!({"a": 3, "b": 1}));
        assert_ne!(fingerprint(&a), fingerprint(&c));

        let none = GraphQLRequest {
            query: "{ x }".into(),
            ..Default::default()
        };
        let empty = request("{ x }", json!(null));
        assert_eq!(fingerprint(&none), fingerprint(&empty));
    }

    #[test]
    fn test_operation_name_distinguishes_entries() {
        let mut a = request("query A { a } query B { b }", json!({}));
        let mut b = a.clone();
        a.operation_name = Some("A".into());
        b.operation_name = Some("B".into());
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(300), false);
        let key = cache.key_for(&request("{ a }", json!({})));

        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache
            .set(&key, b"{\"data\":{}}".to_vec(), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(b"{\"data\":{}}".to_vec()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_on_hit_extends_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cache = QueryCache::new(store.clone(), Duration::from_secs(300), true);
        cache
            .set("gql:query:k", b"x".to_vec(), Some(Duration::from_secs(1)))
            .await
            .unwrap();

        cache.get("gql:query:k").await.unwrap();
        assert!(store.ttl("gql:query:k").unwrap() > Duration::from_secs(200));
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let store = Arc::new(MemoryStore::new());
        let cache = QueryCache::new(store.clone(), Duration::from_secs(300), false);
        cache.set("gql:query:a", b"1".to_vec(), None).await.unwrap();
        cache.set("gql:query:b", b"2".to_vec(), None).await.unwrap();
        store.set("gql:schema:orders", b"type Query".to_vec(), None).await.unwrap();

        assert_eq!(cache.invalidate_pattern("gql:query:*").await.unwrap(), 2);
        assert_eq!(cache.invalidate_pattern("gql:query:*").await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_display_key() {
        let key = format!("{}{}", keys::QUERY_CACHE_PREFIX, "0123456789abcdef0123");
        assert_eq!(display_key(&key), "0123456789abcdef...");
        assert_eq!(display_key("gql:query:abc"), "abc...");
    }
}
