use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::server::AppState;
use crate::store::{keys, StoreError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub store: &'static str,
    pub circuit_breakers: usize,
    pub retry_policies: usize,
    pub subgraphs: usize,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    format!("{}*", keys::QUERY_CACHE_PREFIX)
}

fn store_failure(e: StoreError) -> Response {
    tracing::error!(error = %e, "Admin operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let store_up = matches!(
        tokio::time::timeout(state.config.timeouts.health(), state.store.ping()).await,
        Ok(Ok(()))
    );
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        store: if store_up { "up" } else { "down" },
        circuit_breakers: state.breakers.len(),
        retry_policies: state.retries.len(),
        subgraphs: state.subgraphs.snapshot().subgraphs.len(),
    })
}

pub async fn reset_circuit_breakers(State(state): State<AppState>) -> Response {
    match state.breakers.reset_all().await {
        Ok(()) => {
            tracing::info!(count = state.breakers.len(), "All circuit breakers reset");
            Json(json!({ "reset": state.breakers.len() })).into_response()
        }
        Err(e) => store_failure(e),
    }
}

pub async fn reset_circuit_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(breaker) = state.breakers.get(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown circuit breaker '{name}'") })),
        )
            .into_response();
    };
    match breaker.reset().await {
        Ok(()) => Json(json!({ "reset": name })).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn reset_retries(State(state): State<AppState>) -> Response {
    match state.retries.reset_all().await {
        Ok(()) => Json(json!({ "reset": state.retries.len() })).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Delete cached entries matching a glob, `gql:query:*` when no body is sent.
pub async fn invalidate_cache(State(state): State<AppState>, body: Bytes) -> Response {
    let request: InvalidateRequest = if body.is_empty() {
        InvalidateRequest { pattern: default_pattern() }
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
            }
        }
    };

    if !request.pattern.starts_with("gql:") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "pattern must target the gql: namespace" })),
        )
            .into_response();
    }

    match state.query_cache.invalidate_pattern(&request.pattern).await {
        Ok(removed) => Json(json!({ "pattern": request.pattern, "removed": removed })).into_response(),
        Err(e) => store_failure(e),
    }
}
