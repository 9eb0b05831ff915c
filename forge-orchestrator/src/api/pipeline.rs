//! Pipeline API Handlers
//!
//! Trigger intake, run queries, log snapshots and cancellation.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use forge_core::domain::pipeline::PipelineRun;
use forge_core::dto::log::PipelineLogs;
use forge_core::dto::pipeline::{
    CancelAccepted, EnqueueRun, PageQuery, PipelinePage, PipelineRunView, RunAccepted,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::{admission_service, log_service};

// =============================================================================
// Trigger Intake
// =============================================================================

/// POST /pipelines/runs
/// Queue a pipeline run; execution happens in the background
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRun>,
) -> ApiResult<(StatusCode, Json<RunAccepted>)> {
    tracing::info!(
        "Run requested for repo {} at {}",
        req.repo_id,
        req.commit_sha
    );

    let accepted =
        admission_service::enqueue_run(state.store.as_ref(), &state.orchestrator, req).await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

// =============================================================================
// Query Surface
// =============================================================================

/// GET /pipelines?page&size
/// List runs, newest first
pub async fn list_pipelines(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<PipelinePage>> {
    page.validate().map_err(ApiError::BadRequest)?;

    tracing::debug!("Listing pipelines: page {} size {}", page.page, page.size);

    let (runs, total) = state.store.list(page).await?;
    let items = runs.into_iter().map(|run| view(&state, run)).collect();

    Ok(Json(PipelinePage {
        items,
        total,
        page: page.page,
        size: page.size,
    }))
}

/// GET /pipelines/{id}
/// Get a run by ID
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRunView>> {
    tracing::debug!("Getting pipeline: {}", id);

    let run = state.orchestrator.status(id).await?;

    Ok(Json(view(&state, run)))
}

/// GET /pipelines/{id}/logs
/// Snapshot of every log event of a run
pub async fn get_pipeline_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineLogs>> {
    let logs = log_service::snapshot(state.store.as_ref(), &state.bus, id).await?;

    Ok(Json(logs))
}

// =============================================================================
// Cancellation
// =============================================================================

/// POST /pipelines/{id}/cancel
/// Cancel a queued or running run
pub async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelAccepted>)> {
    tracing::info!("Cancel requested for pipeline: {}", id);

    let run = state.orchestrator.cancel(id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelAccepted {
            pipeline_id: run.id,
            status: run.status,
        }),
    ))
}

// =============================================================================
// Helper Functions
// =============================================================================

fn view(state: &AppState, run: PipelineRun) -> PipelineRunView {
    let possibly_orphaned = run.is_possibly_orphaned(Utc::now(), state.orphan_after);
    PipelineRunView {
        run,
        possibly_orphaned,
    }
}
