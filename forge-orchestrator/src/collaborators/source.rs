//! Notebook download over HTTP

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::{NotebookSource, RunContext};

/// Fetches `{base_url}/{repo_id}/{commit_sha}/{notebook_ref}`
#[derive(Debug, Clone)]
pub struct HttpNotebookSource {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpNotebookSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: Client::new(),
        }
    }

    fn url(&self, ctx: &RunContext) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            ctx.repo_id,
            ctx.commit_sha,
            ctx.notebook_ref.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl NotebookSource for HttpNotebookSource {
    async fn fetch(&self, ctx: &RunContext) -> Result<Vec<u8>> {
        let url = self.url(ctx);
        tracing::debug!(pipeline_id = %ctx.pipeline_id, "Fetching notebook from {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach notebook source at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "Notebook source returned {} for {}@{}",
                status,
                ctx.notebook_ref,
                ctx.commit_sha
            );
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read notebook body")?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[test]
    fn test_url_layout() {
        let source = HttpNotebookSource::new("http://git.local/raw/", None);
        let ctx = RunContext {
            pipeline_id: Uuid::nil(),
            repo_id: 12,
            commit_sha: "9fceb02".to_string(),
            notebook_ref: "/notebooks/train.ipynb".to_string(),
            workspace: PathBuf::from("/tmp"),
        };
        assert_eq!(
            source.url(&ctx),
            "http://git.local/raw/12/9fceb02/notebooks/train.ipynb"
        );
    }
}
