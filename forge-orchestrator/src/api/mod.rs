//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod stream;

use axum::{
    Router,
    routing::{get, post},
};
use forge_client::ModelServerClient;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::event_bus::EventBus;
use crate::service::orchestrator::Orchestrator;
use crate::store::PipelineStore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PipelineStore>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    /// Used by the readiness probe
    pub model_server: ModelServerClient,
    /// Inactivity after which a running run is flagged as possibly orphaned
    pub orphan_after: chrono::Duration,
    /// Delay between a terminal event and closing a log stream
    pub stream_grace: Duration,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready))
        // Trigger intake
        .route("/pipelines/runs", post(pipeline::trigger_run))
        // Query surface
        .route("/pipelines", get(pipeline::list_pipelines))
        .route("/pipelines/{id}", get(pipeline::get_pipeline))
        .route("/pipelines/{id}/logs", get(pipeline::get_pipeline_logs))
        .route("/pipelines/{id}/cancel", post(pipeline::cancel_pipeline))
        // Live logs
        .route("/ws/pipelines/{id}/logs", get(stream::stream_logs))
        // Add state and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
