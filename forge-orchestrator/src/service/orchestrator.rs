//! Pipeline Orchestrator
//!
//! Runs pipelines on a bounded worker pool, decoupled from the request that
//! queued them. A dispatcher task pulls run ids from the queue and spawns one
//! task per run once a worker permit is free; each run walks the phases
//! `download → validate → execute → register → deploy` in order.
//!
//! After every phase transition the run is written to the store first and only
//! then published on the event bus. The first failing phase fails the run and
//! nothing after it starts.

use anyhow::Context;
use forge_core::domain::log::LogEvent;
use forge_core::domain::pipeline::{
    METRIC_ACCURACY, METRIC_DEPLOYED, MetricValue, Metrics, Phase, PhaseName, PhaseStatus,
    PipelineRun, REASON_CANCELLED,
};
use forge_core::dto::model::LoadModel;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    Collaborators, ExecutionOutput, NotebookConfig, RunContext, TrackedRun,
};
use crate::service::event_bus::EventBus;
use crate::store::{PipelineStore, StoreError};

/// Orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Pipeline {0} not found")]
    NotFound(Uuid),

    #[error("Pipeline {id} cannot be cancelled: {reason}")]
    NotCancellable { id: Uuid, reason: String },

    #[error("Pipeline {0} is already queued or running")]
    AlreadyScheduled(Uuid),

    #[error("Orchestrator is shutting down")]
    QueueClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Execution settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Runs executed in parallel
    pub workers: usize,
    /// Deploy automatically when the quality gate passes
    pub auto_deploy: bool,
    /// Minimum accuracy for deployment
    pub min_accuracy: f64,
    /// Root of the per-run workspaces
    pub workspace: PathBuf,
}

/// In-process state of a run owned by this orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunControl {
    Queued,
    Running { cancel_requested: bool },
    /// The last phase is in flight and will run to completion
    Finishing,
}

/// Runs pipelines and answers `run`, `cancel` and `status`
pub struct Orchestrator {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Uuid>,
}

struct Shared {
    store: Arc<dyn PipelineStore>,
    bus: Arc<EventBus>,
    collaborators: Collaborators,
    settings: OrchestratorSettings,
    controls: Mutex<HashMap<Uuid, RunControl>>,
}

impl Orchestrator {
    /// Create the orchestrator and start its dispatcher
    ///
    /// Must be called inside a Tokio runtime. The dispatcher stops once the
    /// orchestrator is dropped and the queue drains.
    pub fn start(
        store: Arc<dyn PipelineStore>,
        bus: Arc<EventBus>,
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(settings.workers.max(1)));

        info!(
            workers = settings.workers,
            auto_deploy = settings.auto_deploy,
            min_accuracy = settings.min_accuracy,
            "Starting pipeline orchestrator"
        );

        let shared = Arc::new(Shared {
            store,
            bus,
            collaborators,
            settings,
            controls: Mutex::new(HashMap::new()),
        });

        tokio::spawn(dispatch(Arc::clone(&shared), rx, semaphore));

        Self { shared, queue }
    }

    /// Queue a stored run for execution
    ///
    /// Returns as soon as the run is queued.
    pub fn run(&self, pipeline_id: Uuid) -> Result<()> {
        {
            let mut controls = self.shared.controls();
            if controls.contains_key(&pipeline_id) {
                return Err(OrchestratorError::AlreadyScheduled(pipeline_id));
            }
            controls.insert(pipeline_id, RunControl::Queued);
        }

        if self.queue.send(pipeline_id).is_err() {
            self.shared.controls().remove(&pipeline_id);
            return Err(OrchestratorError::QueueClosed);
        }

        debug!(pipeline_id = %pipeline_id, "Run queued");
        Ok(())
    }

    /// Cancel a queued or running run
    ///
    /// A queued run is failed immediately and never starts. A running run stops
    /// at its next phase boundary; the phase in flight always completes. Once
    /// the final phase has started there is no boundary left, so the request
    /// is refused. Returns the run as stored after the request.
    pub async fn cancel(&self, pipeline_id: Uuid) -> Result<PipelineRun> {
        let control = {
            let mut controls = self.shared.controls();
            match controls.get(&pipeline_id).copied() {
                Some(RunControl::Queued) => controls.remove(&pipeline_id),
                Some(RunControl::Running { .. }) => {
                    let requested = RunControl::Running {
                        cancel_requested: true,
                    };
                    controls.insert(pipeline_id, requested);
                    Some(requested)
                }
                Some(RunControl::Finishing) => {
                    return Err(OrchestratorError::NotCancellable {
                        id: pipeline_id,
                        reason: "final phase in flight".to_string(),
                    });
                }
                None => None,
            }
        };

        match control {
            Some(RunControl::Queued) => {
                info!(pipeline_id = %pipeline_id, "Cancelling queued run");
                self.shared.fail_next_pending(pipeline_id, REASON_CANCELLED).await
            }
            Some(RunControl::Running { .. }) => {
                info!(pipeline_id = %pipeline_id, "Cancellation requested for running run");
                self.status(pipeline_id).await
            }
            Some(RunControl::Finishing) | None => {
                let run = self.status(pipeline_id).await?;
                let reason = if run.status.is_terminal() {
                    format!("run already {}", run.status)
                } else {
                    "run is not owned by this orchestrator".to_string()
                };
                Err(OrchestratorError::NotCancellable {
                    id: pipeline_id,
                    reason,
                })
            }
        }
    }

    /// Current durable record of a run
    pub async fn status(&self, pipeline_id: Uuid) -> Result<PipelineRun> {
        self.shared
            .store
            .get(pipeline_id)
            .await?
            .ok_or(OrchestratorError::NotFound(pipeline_id))
    }

    /// Number of runs queued or running in this process
    pub fn active_runs(&self) -> usize {
        self.shared.controls().len()
    }
}

/// Hand queued runs to workers as permits become free
async fn dispatch(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Uuid>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(pipeline_id) = rx.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        if !shared.claim(pipeline_id) {
            debug!(pipeline_id = %pipeline_id, "Skipping cancelled run");
            continue;
        }

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            shared.execute(pipeline_id).await;
            shared.controls().remove(&pipeline_id);
            // Permit is released when dropped
            drop(permit);
        });
    }

    debug!("Dispatcher stopped");
}

/// What a successful phase hands to the next one
#[derive(Default)]
struct RunState {
    notebook: Option<Vec<u8>>,
    config: Option<NotebookConfig>,
    execution: Option<ExecutionOutput>,
    tracked: Option<TrackedRun>,
}

impl Shared {
    fn controls(&self) -> MutexGuard<'_, HashMap<Uuid, RunControl>> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a queued run to running; false if it was cancelled meanwhile
    fn claim(&self, pipeline_id: Uuid) -> bool {
        let mut controls = self.controls();
        if controls.get(&pipeline_id) != Some(&RunControl::Queued) {
            return false;
        }
        controls.insert(
            pipeline_id,
            RunControl::Running {
                cancel_requested: false,
            },
        );
        true
    }

    /// Check for a pending cancel before `phase` starts
    ///
    /// Returns false if the run was cancelled. Starting the last phase marks
    /// the run as finishing under the same lock, so a cancel either lands
    /// before it or is refused.
    fn begin_phase(&self, pipeline_id: Uuid, phase: PhaseName) -> bool {
        let mut controls = self.controls();
        let Some(control) = controls.get_mut(&pipeline_id) else {
            return true;
        };
        if matches!(control, RunControl::Running { cancel_requested: true }) {
            return false;
        }
        if phase == PhaseName::Deploy {
            *control = RunControl::Finishing;
        }
        true
    }

    /// Execute every phase of a run, stopping at the first failure
    async fn execute(&self, pipeline_id: Uuid) {
        let run = match self.store.get(pipeline_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                error!(pipeline_id = %pipeline_id, "Queued run is missing from the store");
                return;
            }
            Err(e) => {
                error!(pipeline_id = %pipeline_id, "Failed to load queued run: {}", e);
                return;
            }
        };

        let ctx = RunContext::for_run(&run, &self.settings.workspace);

        info!(
            pipeline_id = %pipeline_id,
            repo_id = run.repo_id,
            commit_sha = %run.commit_sha,
            notebook = %run.notebook_ref,
            "Pipeline started"
        );

        self.run_phases(pipeline_id, &ctx).await;

        if let Err(e) = ctx.clean_workspace().await {
            warn!(pipeline_id = %pipeline_id, "Failed to clean run workspace: {}", e);
        }
    }

    /// Walk the phases in order until one fails or the run is cancelled
    async fn run_phases(&self, pipeline_id: Uuid, ctx: &RunContext) {
        let mut state = RunState::default();

        for name in PhaseName::ALL {
            if !self.begin_phase(pipeline_id, name) {
                info!(pipeline_id = %pipeline_id, phase = %name, "Run cancelled before phase");
                if let Err(e) = self.fail_next_pending(pipeline_id, REASON_CANCELLED).await {
                    error!(pipeline_id = %pipeline_id, "Failed to record cancellation: {}", e);
                }
                return;
            }

            let running = match self.transition(pipeline_id, name, PhaseStatus::Running, None).await {
                Ok(phase) => phase,
                Err(e) => {
                    error!(pipeline_id = %pipeline_id, phase = %name, "Failed to start phase: {}", e);
                    return;
                }
            };

            info!(pipeline_id = %pipeline_id, phase = %name, "Phase started");

            match self.run_phase(name, ctx, &mut state).await {
                Ok(logs) => {
                    if let Err(e) = self
                        .finish(&running, PhaseStatus::Success, logs, pipeline_id)
                        .await
                    {
                        error!(pipeline_id = %pipeline_id, phase = %name, "Failed to record phase success: {}", e);
                        return;
                    }
                    info!(pipeline_id = %pipeline_id, phase = %name, "Phase succeeded");
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    warn!(pipeline_id = %pipeline_id, phase = %name, "Phase failed: {}", reason);

                    if let Err(e) = self.store.set_reason(pipeline_id, &reason).await {
                        error!(pipeline_id = %pipeline_id, "Failed to record failure reason: {}", e);
                    }
                    if let Err(e) = self
                        .finish(&running, PhaseStatus::Failed, reason, pipeline_id)
                        .await
                    {
                        error!(pipeline_id = %pipeline_id, phase = %name, "Failed to record phase failure: {}", e);
                    }
                    return;
                }
            }
        }

        info!(pipeline_id = %pipeline_id, "Pipeline completed");
    }

    async fn finish(
        &self,
        running: &Phase,
        status: PhaseStatus,
        logs: String,
        pipeline_id: Uuid,
    ) -> std::result::Result<Phase, StoreError> {
        let update = running.with_status(status).with_log(logs);
        self.persist_and_publish(pipeline_id, &update).await?;
        Ok(update)
    }

    /// Move the named phase to `status`, appending `log` if given
    async fn transition(
        &self,
        pipeline_id: Uuid,
        name: PhaseName,
        status: PhaseStatus,
        log: Option<&str>,
    ) -> std::result::Result<Phase, StoreError> {
        let run = self
            .store
            .get(pipeline_id)
            .await?
            .ok_or(StoreError::NotFound(pipeline_id))?;
        let current = run
            .phase(name)
            .cloned()
            .unwrap_or_else(|| Phase::pending(name, run.created_at));

        let mut update = current.with_status(status);
        if let Some(log) = log {
            update = update.with_log(log);
        }

        self.persist_and_publish(pipeline_id, &update).await?;
        Ok(update)
    }

    /// Write the phase to the store, then mirror it on the bus
    async fn persist_and_publish(
        &self,
        pipeline_id: Uuid,
        phase: &Phase,
    ) -> std::result::Result<PipelineRun, StoreError> {
        let run = self.store.update_phase(pipeline_id, phase).await?;

        let event = LogEvent::from_phase(pipeline_id, phase, run.status);
        let receivers = self.bus.publish(event);
        debug!(
            pipeline_id = %pipeline_id,
            phase = %phase.name,
            status = %phase.status,
            run_status = %run.status,
            receivers,
            "Phase transition published"
        );

        Ok(run)
    }

    /// Fail the first pending phase, ending the run with `reason`
    async fn fail_next_pending(
        &self,
        pipeline_id: Uuid,
        reason: &str,
    ) -> Result<PipelineRun> {
        let run = self
            .store
            .get(pipeline_id)
            .await?
            .ok_or(OrchestratorError::NotFound(pipeline_id))?;

        let Some(next) = run.next_pending().map(|p| p.name) else {
            return Err(OrchestratorError::NotCancellable {
                id: pipeline_id,
                reason: "no phase left to cancel".to_string(),
            });
        };

        self.store.set_reason(pipeline_id, reason).await?;
        self.transition(pipeline_id, next, PhaseStatus::Failed, Some(reason))
            .await?;

        Ok(self
            .store
            .get(pipeline_id)
            .await?
            .ok_or(OrchestratorError::NotFound(pipeline_id))?)
    }

    /// Run one phase's collaborator and return the phase log
    async fn run_phase(
        &self,
        name: PhaseName,
        ctx: &RunContext,
        state: &mut RunState,
    ) -> anyhow::Result<String> {
        let c = &self.collaborators;

        match name {
            PhaseName::Download => {
                let notebook = c.source.fetch(ctx).await?;
                let log = format!(
                    "Downloaded {} ({} bytes) at {}",
                    ctx.notebook_ref,
                    notebook.len(),
                    ctx.commit_sha
                );
                state.notebook = Some(notebook);
                Ok(log)
            }
            PhaseName::Validate => {
                let notebook = state.notebook.as_deref().context("No notebook downloaded")?;
                let config = c.validator.validate(notebook)?;
                let log = format!(
                    "All required tags present; model {} version {}",
                    config.model_name, config.version
                );
                state.config = Some(config);
                Ok(log)
            }
            PhaseName::Execute => {
                let notebook = state.notebook.as_deref().context("No notebook downloaded")?;
                let config = state.config.as_ref().context("Notebook not validated")?;
                let output = c.executor.execute(ctx, notebook, config).await?;
                let log = serde_json::to_string(&output.cell_logs)?;
                state.execution = Some(output);
                Ok(log)
            }
            PhaseName::Register => {
                let config = state.config.as_ref().context("Notebook not validated")?;
                let output = state.execution.as_ref().context("Notebook not executed")?;
                let tracked = c.tracker.record(ctx, config, output).await?;

                self.store
                    .update_metrics(ctx.pipeline_id, &tracked.metrics)
                    .await
                    .context("Failed to store metrics")?;

                let log = format!(
                    "Tracked run {} (accuracy {:.4}); artifact {}",
                    tracked.run_id,
                    accuracy_of(&tracked.metrics),
                    tracked.artifact_location.as_deref().unwrap_or("none")
                );
                state.tracked = Some(tracked);
                Ok(log)
            }
            PhaseName::Deploy => self.deploy(ctx, state).await,
        }
    }

    /// Deploy gate: only a passing, auto-deployable model reaches the registry
    async fn deploy(&self, ctx: &RunContext, state: &RunState) -> anyhow::Result<String> {
        let config = state.config.as_ref().context("Notebook not validated")?;
        let tracked = state.tracked.as_ref().context("Run not registered")?;
        let accuracy = accuracy_of(&tracked.metrics);

        let skip = if !self.settings.auto_deploy {
            Some("auto-deploy disabled".to_string())
        } else if accuracy < self.settings.min_accuracy {
            Some(format!(
                "accuracy {:.4} below threshold {:.2}",
                accuracy, self.settings.min_accuracy
            ))
        } else {
            None
        };

        if let Some(skip) = skip {
            info!(
                pipeline_id = %ctx.pipeline_id,
                model = %config.model_name,
                "Deploy skipped: {}",
                skip
            );
            self.record_deployed(ctx.pipeline_id, false).await?;
            return Ok(format!("Deploy skipped: {}", skip));
        }

        let artifact_location = tracked
            .artifact_location
            .clone()
            .context("Notebook did not export a model")?;
        let req = LoadModel {
            version: config.version.clone(),
            artifact_location,
            accuracy,
            pipeline_id: Some(ctx.pipeline_id),
        };
        let info = self.collaborators.deployer.deploy(&config.model_name, &req).await?;

        info!(
            pipeline_id = %ctx.pipeline_id,
            model = %info.model_name,
            version = %info.version,
            "Model deployed"
        );
        self.record_deployed(ctx.pipeline_id, true).await?;

        Ok(format!(
            "Deployed {} version {} (accuracy {:.4})",
            info.model_name, info.version, accuracy
        ))
    }

    async fn record_deployed(&self, pipeline_id: Uuid, deployed: bool) -> anyhow::Result<()> {
        let metrics = Metrics::from([(METRIC_DEPLOYED.to_string(), MetricValue::Bool(deployed))]);
        self.store
            .update_metrics(pipeline_id, &metrics)
            .await
            .context("Failed to store deploy decision")?;
        Ok(())
    }
}

fn accuracy_of(metrics: &Metrics) -> f64 {
    metrics
        .get(METRIC_ACCURACY)
        .and_then(MetricValue::as_f64)
        .unwrap_or(0.0)
}
