//! Durable Store
//!
//! Persistent record of every pipeline run: status, ordered phases and
//! metrics. The store is the source of truth; the event bus only mirrors it.
//!
//! Every mutation is atomic per run. Phase updates go through
//! [`PipelineRun::apply_phase`], so both backends enforce the same transition
//! rules.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::domain::pipeline::{Metrics, Phase, PipelineRun, TransitionError};
use forge_core::dto::pipeline::PageQuery;
use uuid::Uuid;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Pipeline {0} not found")]
    NotFound(Uuid),

    #[error("Pipeline {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Invalid phase update: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable record of pipeline runs
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Insert a new run
    async fn create(&self, run: &PipelineRun) -> Result<()>;

    /// Apply a phase update and return the run as stored afterwards
    ///
    /// Idempotent: repeating the current phase state is a no-op.
    async fn update_phase(&self, id: Uuid, phase: &Phase) -> Result<PipelineRun>;

    /// Merge `metrics` into the run's metrics
    async fn update_metrics(&self, id: Uuid, metrics: &Metrics) -> Result<PipelineRun>;

    /// Record why a run failed
    async fn set_reason(&self, id: Uuid, reason: &str) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<PipelineRun>>;

    /// One page of runs, newest first, with the total number of runs
    async fn list(&self, page: PageQuery) -> Result<(Vec<PipelineRun>, u64)>;

    /// Number of running runs with no phase activity since `before`
    async fn count_stale_running(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Check the backend is reachable
    async fn ping(&self) -> Result<()>;
}

/// Apply a phase update in place, logging rejected transitions
fn apply_phase(run: &mut PipelineRun, phase: &Phase) -> Result<bool> {
    run.apply_phase(phase).map_err(|e| {
        tracing::warn!(pipeline_id = %run.id, phase = %phase.name, "Rejected phase update: {}", e);
        StoreError::from(e)
    })
}

fn merge_metrics(run: &mut PipelineRun, metrics: &Metrics) {
    for (key, value) in metrics {
        run.metrics.insert(key.clone(), *value);
    }
}
