//! Log Service
//!
//! Log snapshots for a pipeline run. Events come from the event bus while it
//! still retains them; older runs get events rebuilt from their stored phases.

use forge_core::domain::log::LogEvent;
use forge_core::domain::pipeline::{PhaseStatus, PipelineRun, RunStatus};
use forge_core::dto::log::PipelineLogs;
use uuid::Uuid;

use crate::service::event_bus::EventBus;
use crate::store::{PipelineStore, StoreError};

/// Log service error type
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LogError>;

/// Every known event for a run, in emission order
pub async fn snapshot(
    store: &dyn PipelineStore,
    bus: &EventBus,
    pipeline_id: Uuid,
) -> Result<PipelineLogs> {
    let run = store
        .get(pipeline_id)
        .await?
        .ok_or(LogError::PipelineNotFound(pipeline_id))?;

    let mut logs = bus.history(pipeline_id);
    if logs.is_empty() {
        logs = synthesize(&run);
    }

    Ok(PipelineLogs { pipeline_id, logs })
}

/// One event per phase that has left `pending`, in phase order
///
/// Only the final event carries the run's current status; earlier ones carry
/// `running`, as they would have when emitted.
pub fn synthesize(run: &PipelineRun) -> Vec<LogEvent> {
    let started: Vec<_> = run
        .phases
        .iter()
        .filter(|p| p.status != PhaseStatus::Pending)
        .collect();

    let last = started.len().saturating_sub(1);
    started
        .into_iter()
        .enumerate()
        .map(|(i, phase)| {
            let run_status = if i == last { run.status } else { RunStatus::Running };
            LogEvent::from_phase(run.id, phase, run_status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use forge_core::domain::pipeline::PhaseName;

    fn advance(run: &mut PipelineRun, name: PhaseName, status: PhaseStatus) {
        let phase = run.phase(name).unwrap().with_status(status).with_log(format!("{} log", name));
        run.apply_phase(&phase).unwrap();
    }

    #[test]
    fn test_synthesize_from_phases() {
        let mut run = PipelineRun::new(1, "abc", "nb.ipynb");
        assert!(synthesize(&run).is_empty());

        advance(&mut run, PhaseName::Download, PhaseStatus::Running);
        advance(&mut run, PhaseName::Download, PhaseStatus::Success);
        advance(&mut run, PhaseName::Validate, PhaseStatus::Running);
        advance(&mut run, PhaseName::Validate, PhaseStatus::Failed);

        let events = synthesize(&run);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, PhaseName::Download);
        assert_eq!(events[0].run_status, RunStatus::Running);
        assert_eq!(events[1].status, PhaseStatus::Failed);
        assert_eq!(events[1].run_status, RunStatus::Failed);
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_snapshot_prefers_bus_history() {
        let store = MemoryStore::new();
        let bus = EventBus::default();
        let mut run = PipelineRun::new(1, "abc", "nb.ipynb");
        store.create(&run).await.unwrap();

        let empty = snapshot(&store, &bus, run.id).await.unwrap();
        assert!(empty.logs.is_empty());

        advance(&mut run, PhaseName::Download, PhaseStatus::Running);
        let event = LogEvent::from_phase(run.id, run.phase(PhaseName::Download).unwrap(), run.status);
        bus.publish(event.clone());

        let logs = snapshot(&store, &bus, run.id).await.unwrap();
        assert_eq!(logs.logs, vec![event]);
    }

    #[tokio::test]
    async fn test_snapshot_unknown_run() {
        let store = MemoryStore::new();
        let bus = EventBus::default();
        assert!(matches!(
            snapshot(&store, &bus, Uuid::new_v4()).await,
            Err(LogError::PipelineNotFound(_))
        ));
    }
}
