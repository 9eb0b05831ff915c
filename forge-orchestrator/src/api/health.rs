//! Health Check API Handlers
//!
//! Liveness and readiness endpoints for monitoring.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::api::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub store: bool,
    pub model_server: bool,
    pub active_runs: usize,
}

/// GET /ready
/// Reports store reachability and model server health
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let store = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Store is not reachable: {}", e);
            false
        }
    };

    let model_server = match state.model_server.health().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Model server is not healthy: {}", e);
            false
        }
    };

    let ready = store && model_server;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            status: if ready { "ok" } else { "degraded" },
            store,
            model_server,
            active_runs: state.orchestrator.active_runs(),
        }),
    )
}
