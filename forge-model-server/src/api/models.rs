//! Model API Handlers
//!
//! Serving, rollback and unload endpoints, plus the internal load endpoint
//! used as the orchestrator's deploy callback.

use axum::{
    Json,
    extract::{Path, State},
};
use forge_core::domain::model::ModelInfo;
use forge_core::dto::model::{LoadModel, MessageResponse, PredictRequest, PredictResponse};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// GET /models
/// List active models, most recently deployed first
pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    tracing::debug!("Listing loaded models");
    Json(state.registry.list().await)
}

/// POST /predict/{name}
/// Run inference on the active version
pub async fn predict(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PredictRequest>,
) -> ApiResult<Json<PredictResponse>> {
    if req.data.is_empty() {
        return Err(ApiError::BadRequest("data must contain at least one row".to_string()));
    }

    let prediction = state.registry.predict(&name, &req.data).await?;

    tracing::info!(
        model = %name,
        version = %prediction.version,
        input_rows = req.data.len(),
        "Prediction served"
    );

    Ok(Json(PredictResponse {
        prediction: prediction.output,
        model_name: name,
        version: prediction.version,
    }))
}

/// POST /models/{name}/rollback
/// Reactivate the previous version
pub async fn rollback_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ModelInfo>> {
    tracing::info!("Rolling back model: {}", name);

    let info = state.registry.rollback(&name).await?;

    Ok(Json(info))
}

/// DELETE /models/{name}
/// Unload a model and forget its history
pub async fn delete_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    tracing::info!("Unloading model: {}", name);

    let removed = state.registry.delete(&name).await?;

    Ok(Json(MessageResponse::new(format!(
        "Model '{}' v{} unloaded.",
        name, removed.version
    ))))
}

/// POST /internal/load/{name}
/// Load an artifact and activate it as the new version of `name`
pub async fn load_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<LoadModel>,
) -> ApiResult<Json<ModelInfo>> {
    validate_load_request(&name, &req)?;

    tracing::info!(
        model = %name,
        version = %req.version,
        artifact = %req.artifact_location,
        "Loading model"
    );

    let predictor = state
        .loader
        .load(&req.artifact_location)
        .await
        .map_err(|e| {
            tracing::error!(model = %name, "Model load failed: {:#}", e);
            ApiError::Unprocessable(format!("Failed to load model: {:#}", e))
        })?;

    let info = state
        .registry
        .load(&name, &req.version, predictor, req.accuracy, req.pipeline_id)
        .await;

    Ok(Json(info))
}

fn validate_load_request(name: &str, req: &LoadModel) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("model name cannot be empty".to_string()));
    }
    if req.version.trim().is_empty() {
        return Err(ApiError::BadRequest("version cannot be empty".to_string()));
    }
    if req.artifact_location.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "artifact_location cannot be empty".to_string(),
        ));
    }
    if !req.accuracy.is_finite() {
        return Err(ApiError::BadRequest("accuracy must be a finite number".to_string()));
    }
    Ok(())
}
