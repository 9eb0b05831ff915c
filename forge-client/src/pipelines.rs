//! Orchestrator API endpoints

use forge_core::dto::log::PipelineLogs;
use forge_core::dto::pipeline::{
    CancelAccepted, EnqueueRun, PageQuery, PipelinePage, PipelineRunView, RunAccepted,
};
use uuid::Uuid;

use crate::error::Result;
use crate::{OrchestratorClient, handle_empty_response, handle_response};

impl OrchestratorClient {
    // =============================================================================
    // Trigger Intake
    // =============================================================================

    /// Enqueue a pipeline run
    ///
    /// Returns as soon as the run is queued; execution happens asynchronously.
    pub async fn trigger_run(&self, req: &EnqueueRun) -> Result<RunAccepted> {
        let url = format!("{}/pipelines/runs", self.base_url);
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).json(req).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Query Surface
    // =============================================================================

    /// List pipeline runs, newest first
    pub async fn list_pipelines(&self, page: PageQuery) -> Result<PipelinePage> {
        let url = format!("{}/pipelines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("page", page.page), ("size", page.size)])
            .send()
            .await?;

        handle_response(response).await
    }

    /// Get a pipeline run by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineRunView> {
        let url = format!("{}/pipelines/{}", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Snapshot of a run's log events in emission order
    pub async fn get_logs(&self, pipeline_id: Uuid) -> Result<PipelineLogs> {
        let url = format!("{}/pipelines/{}/logs", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Request cancellation of a queued or running run
    pub async fn cancel_pipeline(&self, pipeline_id: Uuid) -> Result<CancelAccepted> {
        let url = format!("{}/pipelines/{}/cancel", self.base_url, pipeline_id);
        let response = self.client.post(&url).send().await?;

        handle_response(response).await
    }

    /// Liveness probe
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_empty_response(response).await
    }
}
