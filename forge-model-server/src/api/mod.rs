//! API Module
//!
//! HTTP API layer for the model server.

pub mod error;
pub mod health;
pub mod models;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::predictor::PredictorLoader;
use crate::registry::ModelRegistry;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub loader: Arc<dyn PredictorLoader>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // System
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready))
        // Serving
        .route("/models", get(models::list_models))
        .route("/predict/{name}", post(models::predict))
        .route("/models/{name}/rollback", post(models::rollback_model))
        .route("/models/{name}", delete(models::delete_model))
        // Deploy callback from the orchestrator
        .route("/internal/load/{name}", post(models::load_model))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
