//! Collaborators
//!
//! The orchestrator drives each phase through one of these narrow traits:
//!
//! | phase    | collaborator         | production implementation |
//! |----------|----------------------|---------------------------|
//! | download | [`NotebookSource`]    | [`HttpNotebookSource`]    |
//! | validate | [`NotebookValidator`] | [`TagValidator`]          |
//! | execute  | [`NotebookExecutor`]  | [`PapermillExecutor`]     |
//! | register | [`ExperimentTracker`] | [`FileTracker`]           |
//! | deploy   | [`ModelDeployer`]     | [`HttpModelDeployer`]     |
//!
//! Collaborator errors are `anyhow` errors; the orchestrator turns them into a
//! failed phase and records the message as the run's failure reason.

pub mod deployer;
pub mod executor;
pub mod notebook;
pub mod source;
pub mod tracker;
pub mod validator;

pub use deployer::HttpModelDeployer;
pub use executor::PapermillExecutor;
pub use source::HttpNotebookSource;
pub use tracker::FileTracker;
pub use validator::TagValidator;

use anyhow::Result;
use async_trait::async_trait;
use forge_core::domain::model::ModelInfo;
use forge_core::domain::pipeline::{Metrics, PipelineRun};
use forge_core::dto::model::LoadModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// What a collaborator needs to know about the run it works for
#[derive(Debug, Clone)]
pub struct RunContext {
    pub pipeline_id: Uuid,
    pub repo_id: i64,
    pub commit_sha: String,
    pub notebook_ref: String,
    /// Per-run working directory
    pub workspace: PathBuf,
}

impl RunContext {
    pub fn for_run(run: &PipelineRun, workspace_root: &Path) -> Self {
        Self {
            pipeline_id: run.id,
            repo_id: run.repo_id,
            commit_sha: run.commit_sha.clone(),
            notebook_ref: run.notebook_ref.clone(),
            workspace: workspace_root.join(run.id.to_string()),
        }
    }

    /// First eight characters of the pipeline id
    pub fn short_id(&self) -> String {
        self.pipeline_id.simple().to_string()[..8].to_string()
    }

    /// Remove the run's scratch files
    ///
    /// Only the exported model survives; a workspace without one is removed
    /// entirely.
    pub async fn clean_workspace(&self) -> std::io::Result<()> {
        let model = self.workspace.join(executor::MODEL_FILE);
        if !tokio::fs::try_exists(&model).await? {
            return match tokio::fs::remove_dir_all(&self.workspace).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            };
        }

        let mut entries = tokio::fs::read_dir(&self.workspace).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path == model {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

/// Model identity declared by the notebook's config cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookConfig {
    pub model_name: String,
    pub version: String,
}

/// Output of one code cell, as recorded in the execute phase log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellLog {
    pub cell: usize,
    pub output: String,
}

/// Files produced by a notebook execution
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub output_notebook: PathBuf,
    /// Where the notebook was told to write the model artifact
    pub model_path: PathBuf,
    /// Where the notebook was told to write its metrics
    pub metrics_path: PathBuf,
    pub cell_logs: Vec<CellLog>,
}

/// A tracked experiment run
#[derive(Debug, Clone)]
pub struct TrackedRun {
    pub run_id: String,
    /// Location of the exported model; `None` if the notebook exported none
    pub artifact_location: Option<String>,
    pub metrics: Metrics,
}

#[async_trait]
pub trait NotebookSource: Send + Sync {
    /// Fetch the raw notebook bytes for a run
    async fn fetch(&self, ctx: &RunContext) -> Result<Vec<u8>>;
}

pub trait NotebookValidator: Send + Sync {
    /// Check the notebook follows the pipeline conventions and read its config
    fn validate(&self, notebook: &[u8]) -> Result<NotebookConfig>;
}

#[async_trait]
pub trait NotebookExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &RunContext,
        notebook: &[u8],
        config: &NotebookConfig,
    ) -> Result<ExecutionOutput>;
}

#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Record the execution's artifact and metrics
    async fn record(
        &self,
        ctx: &RunContext,
        config: &NotebookConfig,
        output: &ExecutionOutput,
    ) -> Result<TrackedRun>;
}

#[async_trait]
pub trait ModelDeployer: Send + Sync {
    /// Activate a new model version in the serving registry
    async fn deploy(&self, model_name: &str, req: &LoadModel) -> Result<ModelInfo>;
}

/// The full set of collaborators one orchestrator works with
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn NotebookSource>,
    pub validator: Arc<dyn NotebookValidator>,
    pub executor: Arc<dyn NotebookExecutor>,
    pub tracker: Arc<dyn ExperimentTracker>,
    pub deployer: Arc<dyn ModelDeployer>,
}
