//! Shared fixtures: scripted collaborators around the real tag validator,
//! file tracker and model registry.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use forge_core::domain::model::ModelInfo;
use forge_core::domain::pipeline::PipelineRun;
use forge_core::dto::model::LoadModel;
use forge_core::dto::pipeline::EnqueueRun;
use forge_model_server::predictor::{FileLoader, LinearModel, PredictorLoader};
use forge_model_server::registry::ModelRegistry;
use forge_client::ModelServerClient;
use forge_orchestrator::api::{self, AppState};
use forge_orchestrator::collaborators::executor::{METRICS_FILE, MODEL_FILE, OUTPUT_NOTEBOOK};
use forge_orchestrator::collaborators::{
    CellLog, Collaborators, ExecutionOutput, FileTracker, ModelDeployer, NotebookConfig,
    NotebookExecutor, NotebookSource, RunContext, TagValidator,
};
use forge_orchestrator::service::event_bus::EventBus;
use forge_orchestrator::service::orchestrator::{Orchestrator, OrchestratorSettings};
use forge_orchestrator::store::{MemoryStore, PipelineStore};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const MODEL_NAME: &str = "iris";

/// Notebook carrying every required tag
pub fn valid_notebook() -> Vec<u8> {
    notebook_with_tags(&[
        "mlops:config",
        "mlops:preprocessing",
        "mlops:training",
        "mlops:export",
    ])
}

pub fn notebook_with_tags(tags: &[&str]) -> Vec<u8> {
    let cells: Vec<_> = tags
        .iter()
        .map(|tag| {
            let source = if *tag == "mlops:config" {
                format!("MODEL_NAME = \"{}\"\nVERSION = \"1\"\n", MODEL_NAME)
            } else {
                "pass".to_string()
            };
            json!({ "cell_type": "code", "metadata": { "tags": [tag] }, "source": source })
        })
        .collect();
    serde_json::to_vec(&json!({ "cells": cells })).unwrap()
}

pub struct StaticSource(pub Vec<u8>);

#[async_trait]
impl NotebookSource for StaticSource {
    async fn fetch(&self, _ctx: &RunContext) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Writes a linear model and metrics instead of running papermill
///
/// When `hold` is set, each execution waits for a permit on it; `entered`
/// gets a permit as soon as an execution starts.
pub struct ScriptedExecutor {
    pub accuracy: f64,
    pub export_model: bool,
    pub calls: AtomicUsize,
    pub entered: Arc<Semaphore>,
    pub hold: Option<Arc<Semaphore>>,
}

impl ScriptedExecutor {
    pub fn new(accuracy: f64) -> Self {
        Self {
            accuracy,
            export_model: true,
            calls: AtomicUsize::new(0),
            entered: Arc::new(Semaphore::new(0)),
            hold: None,
        }
    }

    pub fn held(accuracy: f64) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Self {
            hold: Some(Arc::clone(&gate)),
            ..Self::new(accuracy)
        };
        (executor, gate)
    }

    /// Reports metrics but writes no model artifact
    pub fn without_model(accuracy: f64) -> Self {
        Self {
            export_model: false,
            ..Self::new(accuracy)
        }
    }
}

#[async_trait]
impl NotebookExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        ctx: &RunContext,
        _notebook: &[u8],
        _config: &NotebookConfig,
    ) -> Result<ExecutionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.add_permits(1);
        if let Some(gate) = &self.hold {
            gate.acquire().await?.forget();
        }

        tokio::fs::create_dir_all(&ctx.workspace).await?;
        let output = ExecutionOutput {
            output_notebook: ctx.workspace.join(OUTPUT_NOTEBOOK),
            model_path: ctx.workspace.join(MODEL_FILE),
            metrics_path: ctx.workspace.join(METRICS_FILE),
            cell_logs: vec![CellLog {
                cell: 0,
                output: "trained".to_string(),
            }],
        };
        let model = LinearModel {
            weights: vec![1.0, 1.0],
            bias: 0.0,
            threshold: None,
        };
        if self.export_model {
            tokio::fs::write(&output.model_path, serde_json::to_vec(&model)?).await?;
        }
        tokio::fs::write(&output.output_notebook, b"{}").await?;
        tokio::fs::write(
            &output.metrics_path,
            serde_json::to_vec(&json!({ "accuracy": self.accuracy }))?,
        )
        .await?;
        Ok(output)
    }
}

/// Deploys straight into an in-process model registry
///
/// Like `ScriptedExecutor`, `entered` gets a permit per deploy and `hold`, if
/// set, keeps the deploy waiting for a permit.
pub struct RegistryDeployer {
    pub registry: Arc<ModelRegistry>,
    pub loader: FileLoader,
    pub entered: Arc<Semaphore>,
    pub hold: Option<Arc<Semaphore>>,
}

#[async_trait]
impl ModelDeployer for RegistryDeployer {
    async fn deploy(&self, model_name: &str, req: &LoadModel) -> Result<ModelInfo> {
        self.entered.add_permits(1);
        if let Some(gate) = &self.hold {
            gate.acquire().await?.forget();
        }

        let predictor = self.loader.load(&req.artifact_location).await?;
        Ok(self
            .registry
            .load(model_name, &req.version, predictor, req.accuracy, req.pipeline_id)
            .await)
    }
}

pub struct FailingDeployer;

#[async_trait]
impl ModelDeployer for FailingDeployer {
    async fn deploy(&self, _model_name: &str, _req: &LoadModel) -> Result<ModelInfo> {
        anyhow::bail!("model server unreachable")
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ModelRegistry>,
    pub executor: Arc<ScriptedExecutor>,
    pub deploy_entered: Arc<Semaphore>,
    pub workspace: tempfile::TempDir,
}

pub struct HarnessBuilder {
    notebook: Vec<u8>,
    executor: ScriptedExecutor,
    deployer: Option<Arc<dyn ModelDeployer>>,
    deploy_gate: Option<Arc<Semaphore>>,
    workers: usize,
    auto_deploy: bool,
    min_accuracy: f64,
}

impl HarnessBuilder {
    pub fn new(accuracy: f64) -> Self {
        Self {
            notebook: valid_notebook(),
            executor: ScriptedExecutor::new(accuracy),
            deployer: None,
            deploy_gate: None,
            workers: 2,
            auto_deploy: true,
            min_accuracy: 0.70,
        }
    }

    pub fn notebook(mut self, notebook: Vec<u8>) -> Self {
        self.notebook = notebook;
        self
    }

    pub fn executor(mut self, executor: ScriptedExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn deployer(mut self, deployer: Arc<dyn ModelDeployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Hold each registry deploy until `gate` hands out a permit
    pub fn deploy_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.deploy_gate = Some(gate);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn auto_deploy(mut self, auto_deploy: bool) -> Self {
        self.auto_deploy = auto_deploy;
        self
    }

    pub fn build(self) -> Harness {
        let workspace = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(ModelRegistry::default());
        let executor = Arc::new(self.executor);
        let deploy_entered = Arc::new(Semaphore::new(0));

        let deployer: Arc<dyn ModelDeployer> = match self.deployer {
            Some(deployer) => deployer,
            None => Arc::new(RegistryDeployer {
                registry: Arc::clone(&registry),
                loader: FileLoader::new(workspace.path()),
                entered: Arc::clone(&deploy_entered),
                hold: self.deploy_gate,
            }),
        };

        let collaborators = Collaborators {
            source: Arc::new(StaticSource(self.notebook)),
            validator: Arc::new(TagValidator),
            executor: executor.clone(),
            tracker: Arc::new(FileTracker),
            deployer,
        };

        let orchestrator = Arc::new(Orchestrator::start(
            store.clone(),
            bus.clone(),
            collaborators,
            OrchestratorSettings {
                workers: self.workers,
                auto_deploy: self.auto_deploy,
                min_accuracy: self.min_accuracy,
                workspace: workspace.path().to_path_buf(),
            },
        ));

        Harness {
            store,
            bus,
            orchestrator,
            registry,
            executor,
            deploy_entered,
            workspace,
        }
    }
}

impl Harness {
    pub async fn trigger(&self) -> Uuid {
        let req = EnqueueRun {
            repo_id: 1,
            commit_sha: "9fceb02d0ae598e95dc970b74767f19372d61af8".to_string(),
            notebook_ref: "notebooks/train.ipynb".to_string(),
        };
        forge_orchestrator::service::admission::enqueue_run(
            self.store.as_ref(),
            &self.orchestrator,
            req,
        )
        .await
        .unwrap()
        .pipeline_id
    }

    /// Poll the store until the run reaches a terminal status
    pub async fn wait_terminal(&self, id: Uuid) -> PipelineRun {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let run = self.store.get(id).await.unwrap().unwrap();
                if run.status.is_terminal() {
                    return run;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run did not finish in time")
    }

    /// HTTP router over this harness; the model server URL points nowhere
    pub fn router(&self) -> axum::Router {
        api::create_router(AppState {
            store: self.store.clone(),
            bus: Arc::clone(&self.bus),
            orchestrator: Arc::clone(&self.orchestrator),
            model_server: ModelServerClient::new("http://127.0.0.1:9"),
            orphan_after: chrono::Duration::hours(1),
            stream_grace: Duration::from_millis(10),
        })
    }

    /// Wait until an execution has entered the executor
    pub async fn wait_executing(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.executor.entered.acquire())
            .await
            .expect("executor was not reached in time")
            .unwrap()
            .forget();
    }

    /// Wait until no run is queued or running, workspace cleanup included
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.orchestrator.active_runs() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("runs did not settle in time")
    }

    /// Files left in a run's workspace, sorted
    pub fn workspace_files(&self, id: Uuid) -> Vec<String> {
        let dir = self.workspace.path().join(id.to_string());
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Wait until a deploy has entered the registry deployer
    pub async fn wait_deploying(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.deploy_entered.acquire())
            .await
            .expect("deployer was not reached in time")
            .unwrap()
            .forget();
    }
}
