//! Deploy callback over HTTP

use anyhow::{Context, Result};
use async_trait::async_trait;
use forge_client::ModelServerClient;
use forge_core::domain::model::ModelInfo;
use forge_core::dto::model::LoadModel;

use super::ModelDeployer;

/// Loads models into the model server through `POST /internal/load/{name}`
#[derive(Debug, Clone)]
pub struct HttpModelDeployer {
    client: ModelServerClient,
}

impl HttpModelDeployer {
    pub fn new(client: ModelServerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelDeployer for HttpModelDeployer {
    async fn deploy(&self, model_name: &str, req: &LoadModel) -> Result<ModelInfo> {
        self.client
            .load_model(model_name, req)
            .await
            .with_context(|| {
                format!(
                    "Model server at {} rejected {} v{}",
                    self.client.base_url(),
                    model_name,
                    req.version
                )
            })
    }
}
