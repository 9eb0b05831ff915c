//! Admission Service
//!
//! Accepts "run requested" triggers: validates them, records a queued run and
//! hands it to the orchestrator. Execution happens later, off the request path.

use forge_core::domain::pipeline::{PipelineRun, RunStatus};
use forge_core::dto::pipeline::{EnqueueRun, RunAccepted};

use crate::service::orchestrator::{Orchestrator, OrchestratorError};
use crate::store::{PipelineStore, StoreError};

/// Admission error type
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Invalid trigger: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Create a queued run for a trigger and schedule it
///
/// Malformed triggers are rejected before anything is stored.
pub async fn enqueue_run(
    store: &dyn PipelineStore,
    orchestrator: &Orchestrator,
    req: EnqueueRun,
) -> Result<RunAccepted, AdmissionError> {
    req.validate().map_err(AdmissionError::Invalid)?;

    let run = PipelineRun::new(req.repo_id, req.commit_sha.trim(), req.notebook_ref.trim());
    store.create(&run).await?;

    if let Err(e) = orchestrator.run(run.id) {
        tracing::error!(pipeline_id = %run.id, "Failed to schedule run: {}", e);
        return Err(e.into());
    }

    tracing::info!(
        pipeline_id = %run.id,
        repo_id = run.repo_id,
        commit_sha = %run.commit_sha,
        "Pipeline run queued"
    );

    Ok(RunAccepted {
        status: RunStatus::Queued,
        pipeline_id: run.id,
    })
}
