//! Subscribers to subgraph set changes.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything an observer needs to address one subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubgraphConfig {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_url: Option<String>,
    #[serde(skip)]
    pub sdl: String,
}

/// Receives the full subgraph set after every successful refresh.
pub trait SubgraphObserver: Send + Sync {
    fn update_subgraphs(&self, subgraphs: &[SubgraphConfig]);
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    pub subgraphs: Vec<SubgraphConfig>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Observer that keeps the latest subgraph set for introspection.
#[derive(Debug, Default)]
pub struct SubgraphRegistry {
    current: ArcSwap<RegistrySnapshot>,
}

impl SubgraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> std::sync::Arc<RegistrySnapshot> {
        self.current.load_full()
    }
}

impl SubgraphObserver for SubgraphRegistry {
    fn update_subgraphs(&self, subgraphs: &[SubgraphConfig]) {
        self.current.store(std::sync::Arc::new(RegistrySnapshot {
            subgraphs: subgraphs.to_vec(),
            updated_at: Some(Utc::now()),
        }));
        tracing::info!(count = subgraphs.len(), "Subgraph registry updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_keeps_latest_set() {
        let registry = SubgraphRegistry::new();
        assert!(registry.snapshot().subgraphs.is_empty());
        assert!(registry.snapshot().updated_at.is_none());

        let orders = SubgraphConfig {
            name: "orders".into(),
            url: "http://orders:4001/query".into(),
            subscription_url: None,
            sdl: "type Query { orders: [Order] }".into(),
        };
        registry.update_subgraphs(&[orders.clone()]);
        registry.update_subgraphs(&[orders.clone(), SubgraphConfig { name: "users".into(), ..orders }]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.subgraphs.len(), 2);
        assert_eq!(snapshot.subgraphs[1].name, "users");
        assert!(snapshot.updated_at.is_some());
    }
}
