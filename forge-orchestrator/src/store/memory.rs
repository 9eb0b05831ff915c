//! In-process store
//!
//! Not durable: runs are lost on restart. Selected with `DATABASE_URL=memory://`
//! and used by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::domain::pipeline::{Metrics, Phase, PipelineRun, RunStatus};
use forge_core::dto::pipeline::PageQuery;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PipelineStore, Result, StoreError, apply_phase, merge_metrics};

#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: Uuid, mutate: F) -> Result<PipelineRun>
    where
        F: FnOnce(&mut PipelineRun) -> Result<bool> + Send,
    {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        // Work on a copy so a rejected update leaves the stored run untouched
        let mut updated = run.clone();
        if mutate(&mut updated)? {
            *run = updated.clone();
        }
        Ok(updated)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(StoreError::AlreadyExists(run.id));
        }
        runs.insert(run.id, run.clone());
        Ok(())
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
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list(&self, page: PageQuery) -> Result<(Vec<PipelineRun>, u64)> {
        let runs = self.runs.read().await;
        let mut all: Vec<&PipelineRun> = runs.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let items = all
            .into_iter()
            .skip(offset)
            .take(page.size as usize)
            .cloned()
            .collect();

        Ok((items, runs.len() as u64))
    }

    async fn count_stale_running(&self, before: DateTime<Utc>) -> Result<u64> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|r| r.status == RunStatus::Running && r.last_activity() < before)
            .count() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::domain::pipeline::{METRIC_ACCURACY, MetricValue, PhaseName, PhaseStatus};

    async fn seeded() -> (MemoryStore, PipelineRun) {
        let store = MemoryStore::new();
        let run = PipelineRun::new(1, "9fceb02", "train.ipynb");
        store.create(&run).await.unwrap();
        (store, run)
    }

    fn phase(run: &PipelineRun, name: PhaseName, status: PhaseStatus) -> Phase {
        run.phase(name).unwrap().with_status(status)
    }

    #[tokio::test]
    async fn test_create_twice_is_rejected() {
        let (store, run) = seeded().await;
        assert!(matches!(
            store.create(&run).await,
            Err(StoreError::AlreadyExists(id)) if id == run.id
        ));
    }

    #[tokio::test]
    async fn test_update_phase_derives_status() {
        let (store, run) = seeded().await;

        let running = phase(&run, PhaseName::Download, PhaseStatus::Running);
        let updated = store.update_phase(run.id, &running).await.unwrap();
        assert_eq!(updated.status, RunStatus::Running);
        assert!(updated.started_at.is_some());

        // Repeating the same update changes nothing
        let again = store.update_phase(run.id, &running).await.unwrap();
        assert_eq!(again, updated);

        let failed = running.with_status(PhaseStatus::Failed).with_log("boom");
        let updated = store.update_phase(run.id, &failed).await.unwrap();
        assert_eq!(updated.status, RunStatus::Failed);
        assert!(updated.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_run_untouched() {
        let (store, run) = seeded().await;

        let out_of_order = phase(&run, PhaseName::Execute, PhaseStatus::Running);
        let err = store.update_phase(run.id, &out_of_order).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));

        let stored = store.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored, run);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(store.get(id).await.unwrap().is_none());
        assert!(matches!(
            store.set_reason(id, "x").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metrics_merge() {
        let (store, run) = seeded().await;
        let mut metrics = Metrics::new();
        metrics.insert(METRIC_ACCURACY.to_string(), MetricValue::Number(0.9));
        store.update_metrics(run.id, &metrics).await.unwrap();

        let mut more = Metrics::new();
        more.insert("f1".to_string(), MetricValue::Number(0.8));
        let updated = store.update_metrics(run.id, &more).await.unwrap();

        assert_eq!(updated.accuracy(), Some(0.9));
        assert_eq!(updated.metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_list_is_paged_newest_first() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut run = PipelineRun::new(1, "abc", "nb.ipynb");
            run.created_at += chrono::Duration::seconds(i);
            store.create(&run).await.unwrap();
            ids.push(run.id);
        }

        let (items, total) = store.list(PageQuery { page: 1, size: 2 }).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(items.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let (items, _) = store.list(PageQuery { page: 3, size: 2 }).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_count_stale_running() {
        let (store, run) = seeded().await;
        let running = phase(&run, PhaseName::Download, PhaseStatus::Running);
        store.update_phase(run.id, &running).await.unwrap();

        let now = Utc::now();
        assert_eq!(
            store
                .count_stale_running(now - chrono::Duration::hours(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .count_stale_running(now + chrono::Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
    }
}
