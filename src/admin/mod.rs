//! Operator endpoints, protected by a bearer token.
//!
//! # Data Flow
//! ```text
//! /admin/*
//!     → auth.rs (Authorization: Bearer <admin.api_key>)
//!     → handlers.rs (status, breaker/retry resets, cache invalidation)
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuit-breakers/reset", post(reset_circuit_breakers))
        .route("/admin/circuit-breakers/{name}/reset", post(reset_circuit_breaker))
        .route("/admin/retries/reset", post(reset_retries))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
