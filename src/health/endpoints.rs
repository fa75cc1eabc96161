use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use crate::cache::SubgraphStatus;
use crate::http::server::AppState;
use crate::resilience::{CircuitBreakerMetrics, CircuitState, RetryMetrics};

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/circuit-breakers", get(circuit_breakers))
        .route("/health/retries", get(retries))
        .route("/health/subgraphs", get(subgraphs))
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn health_status(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "degraded"
    }
}

async fn liveness(State(state): State<AppState>) -> Response {
    let store_up = matches!(
        tokio::time::timeout(state.config.timeouts.health(), state.store.ping()).await,
        Ok(Ok(()))
    );
    Json(json!({
        "status": health_status(store_up),
        "store": if store_up { "up" } else { "down" },
        "timestamp": timestamp(),
    }))
    .into_response()
}

#[derive(Serialize)]
struct BreakerHealth {
    status: &'static str,
    circuit_breakers: BTreeMap<String, CircuitBreakerMetrics>,
    timestamp: String,
}

async fn circuit_breakers(State(state): State<AppState>) -> Response {
    let metrics = match tokio::time::timeout(state.config.timeouts.health(), state.breakers.all_metrics()).await {
        Ok(metrics) => metrics,
        Err(_) => {
            tracing::warn!("Timed out reading circuit breaker metrics");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "error": "timeout", "timestamp": timestamp() })),
            )
                .into_response();
        }
    };

    let healthy = metrics.iter().all(|m| m.state != CircuitState::Open);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = BreakerHealth {
        status: health_status(healthy),
        circuit_breakers: metrics.into_iter().map(|m| (m.name.clone(), m)).collect(),
        timestamp: timestamp(),
    };
    (status, Json(body)).into_response()
}

#[derive(Serialize)]
struct RetryHealth {
    retry_metrics: BTreeMap<String, RetryMetrics>,
    timestamp: String,
}

async fn retries(State(state): State<AppState>) -> Response {
    let metrics = tokio::time::timeout(state.config.timeouts.health(), state.retries.all_metrics())
        .await
        .unwrap_or_default();
    Json(RetryHealth {
        retry_metrics: metrics.into_iter().map(|m| (m.name.clone(), m)).collect(),
        timestamp: timestamp(),
    })
    .into_response()
}

#[derive(Serialize)]
struct SubgraphHealth {
    name: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscription_url: Option<String>,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_check: Option<i64>,
}

async fn subgraphs(State(state): State<AppState>) -> Response {
    let snapshot = state.subgraphs.snapshot();
    let mut out = Vec::with_capacity(snapshot.subgraphs.len());

    for subgraph in &snapshot.subgraphs {
        let status: Option<SubgraphStatus> = match tokio::time::timeout(
            state.config.timeouts.health(),
            state.schema_cache.subgraph_status(&subgraph.name),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::warn!(service = %subgraph.name, error = %e, "Failed to read subgraph status");
                None
            }
            Err(_) => None,
        };

        out.push(SubgraphHealth {
            name: subgraph.name.clone(),
            url: subgraph.url.clone(),
            subscription_url: subgraph.subscription_url.clone(),
            healthy: status.as_ref().map_or(true, |s| s.healthy),
            last_check: status.map(|s| s.last_check),
        });
    }

    Json(json!({
        "subgraphs": out,
        "updated_at": snapshot.updated_at.map(|t| t.to_rfc3339()),
        "timestamp": timestamp(),
    }))
    .into_response()
}
