//! Health and readiness handlers

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use forge_core::dto::model::ModelServerReady;

use crate::api::AppState;

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /ready
/// Reports how many models are loaded
pub async fn ready(State(state): State<AppState>) -> Json<ModelServerReady> {
    let models_loaded = state.registry.len().await;
    Json(ModelServerReady {
        status: if models_loaded > 0 { "ok" } else { "no_models" }.to_string(),
        models_loaded,
    })
}
