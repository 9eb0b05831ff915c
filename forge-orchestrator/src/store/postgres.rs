//! PostgreSQL-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::domain::pipeline::{Metrics, Phase, PipelineRun};
use forge_core::dto::pipeline::PageQuery;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PipelineStore, Result, StoreError, apply_phase, merge_metrics};
use crate::repository::pipeline_repository;

/// Store backed by the `pipelines` table
///
/// Updates lock the row with `SELECT ... FOR UPDATE`, so concurrent writers to
/// one run are serialized by the database.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock a run, mutate it, and write it back in one transaction
    async fn modify<F>(&self, id: Uuid, mutate: F) -> Result<PipelineRun>
    where
        F: FnOnce(&mut PipelineRun) -> Result<bool> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let mut run = pipeline_repository::find_for_update(&mut *tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        if mutate(&mut run)? {
            pipeline_repository::save_state(&mut *tx, &run).await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        Ok(run)
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn create(&self, run: &PipelineRun) -> Result<()> {
        pipeline_repository::create(&self.pool, run)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::AlreadyExists(run.id)
                }
                other => StoreError::Database(other),
            })
    }

    async fn update_phase(&self, id: Uuid, phase: &Phase) -> Result<PipelineRun> {
        self.modify(id, |run| apply_phase(run, phase)).await
    }

    async fn update_metrics(&self, id: Uuid, metrics: &Metrics) -> Result<PipelineRun> {
        self.modify(id, |run| {
            merge_metrics(run, metrics);
            Ok(true)
        })
        .await
    }

    async fn set_reason(&self, id: Uuid, reason: &str) -> Result<()> {
        self.modify(id, |run| {
            run.reason = Some(reason.to_string());
            Ok(true)
        })
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(pipeline_repository::find_by_id(&self.pool, id).await?)
    }

    async fn list(&self, page: PageQuery) -> Result<(Vec<PipelineRun>, u64)> {
        let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);
        let items = pipeline_repository::list_page(&self.pool, i64::from(page.size), offset).await?;
        let total = pipeline_repository::count(&self.pool).await?;
        Ok((items, u64::try_from(total).unwrap_or_default()))
    }

    async fn count_stale_running(&self, before: DateTime<Utc>) -> Result<u64> {
        let count = pipeline_repository::count_stale_running(&self.pool, before).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(pipeline_repository::ping(&self.pool).await?)
    }
}
