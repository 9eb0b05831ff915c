//! Model server API endpoints

use forge_core::domain::model::ModelInfo;
use forge_core::dto::model::{
    LoadModel, MessageResponse, ModelServerReady, PredictRequest, PredictResponse,
};

use crate::error::Result;
use crate::{ModelServerClient, handle_empty_response, handle_response};

impl ModelServerClient {
    // =============================================================================
    // Serving Surface
    // =============================================================================

    /// List active models, most recently deployed first
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Run inference against the active version of `name`
    pub async fn predict(&self, name: &str, data: Vec<Vec<f64>>) -> Result<PredictResponse> {
        let url = format!("{}/predict/{}", self.base_url, name);
        let response = self
            .client
            .post(&url)
            .json(&PredictRequest { data })
            .send()
            .await?;

        handle_response(response).await
    }

    /// Reactivate the previous version of `name`
    pub async fn rollback(&self, name: &str) -> Result<ModelInfo> {
        let url = format!("{}/models/{}/rollback", self.base_url, name);
        let response = self.client.post(&url).send().await?;

        handle_response(response).await
    }

    /// Unload `name` and forget its history
    pub async fn delete_model(&self, name: &str) -> Result<MessageResponse> {
        let url = format!("{}/models/{}", self.base_url, name);
        let response = self.client.delete(&url).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Deploy Callback
    // =============================================================================

    /// Load an artifact and activate it as the new version of `name`
    pub async fn load_model(&self, name: &str, req: &LoadModel) -> Result<ModelInfo> {
        let url = format!("{}/internal/load/{}", self.base_url, name);
        tracing::debug!(model = %name, version = %req.version, "POST {}", url);
        let response = self.client.post(&url).json(req).send().await?;

        handle_response(response).await
    }

    // =============================================================================
    // Probes
    // =============================================================================

    /// Liveness probe
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_empty_response(response).await
    }

    /// Readiness probe
    pub async fn ready(&self) -> Result<ModelServerReady> {
        let url = format!("{}/ready", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }
}
