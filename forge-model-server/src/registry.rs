//! Model Registry
//!
//! Process-local map from model name to the active version and a short LIFO
//! history of superseded versions.
//!
//! Entries are immutable and shared through `Arc`. Writers swap pointers under
//! the write lock; `predict` clones the active pointer under the read lock and
//! runs the predictor after releasing it, so a prediction always sees one
//! complete entry and never holds up a deploy.

use chrono::{DateTime, Utc};
use forge_core::domain::model::ModelInfo;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::predictor::Predictor;

/// Default number of superseded versions kept per model
pub const DEFAULT_HISTORY_DEPTH: usize = 5;

/// Registry error type
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Model '{0}' is not loaded")]
    NotFound(String),

    #[error("Model '{0}' has no previous version to roll back to")]
    NoHistory(String),

    #[error("Prediction with model '{name}' failed: {source:#}")]
    PredictionFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// A loaded model version
#[derive(Clone)]
pub struct ModelEntry {
    pub name: String,
    pub version: String,
    pub predictor: Arc<dyn Predictor>,
    pub accuracy: f64,
    pub deployed_at: DateTime<Utc>,
    pub is_active: bool,
    pub pipeline_id: Option<Uuid>,
    request_count: Arc<AtomicU64>,
}

impl std::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEntry")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("accuracy", &self.accuracy)
            .field("deployed_at", &self.deployed_at)
            .field("is_active", &self.is_active)
            .field("pipeline_id", &self.pipeline_id)
            .finish_non_exhaustive()
    }
}

impl ModelEntry {
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn with_active(&self, is_active: bool) -> Self {
        Self {
            is_active,
            ..self.clone()
        }
    }

    pub fn info(&self, history_depth: usize) -> ModelInfo {
        ModelInfo {
            model_name: self.name.clone(),
            version: self.version.clone(),
            accuracy: self.accuracy,
            deployed_at: self.deployed_at,
            is_active: self.is_active,
            pipeline_id: self.pipeline_id,
            request_count: self.request_count(),
            history_depth,
        }
    }
}

/// Result of a prediction, tagged with the version that served it
#[derive(Debug, Clone)]
pub struct Prediction {
    pub output: Vec<JsonValue>,
    pub version: String,
}

struct ModelSlot {
    active: Arc<ModelEntry>,
    /// Superseded versions, most recent at the back
    history: VecDeque<Arc<ModelEntry>>,
}

/// Concurrent model registry
pub struct ModelRegistry {
    slots: RwLock<HashMap<String, ModelSlot>>,
    history_depth: usize,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl ModelRegistry {
    pub fn new(history_depth: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            history_depth,
        }
    }

    /// Activate a new version for `name`.
    ///
    /// The previous active entry, if any, is pushed onto the rollback history
    /// and the oldest history entry is dropped once the depth is exceeded.
    /// Returns the new version's info as of the swap.
    pub async fn load(
        &self,
        name: &str,
        version: &str,
        predictor: Arc<dyn Predictor>,
        accuracy: f64,
        pipeline_id: Option<Uuid>,
    ) -> ModelInfo {
        let entry = Arc::new(ModelEntry {
            name: name.to_string(),
            version: version.to_string(),
            predictor,
            accuracy,
            deployed_at: Utc::now(),
            is_active: true,
            pipeline_id,
            request_count: Arc::new(AtomicU64::new(0)),
        });

        let mut slots = self.slots.write().await;
        let history_depth = match slots.get_mut(name) {
            Some(slot) => {
                let previous = std::mem::replace(&mut slot.active, Arc::clone(&entry));
                info!(
                    model = name,
                    version = version,
                    previous_version = %previous.version,
                    "Model version activated"
                );
                slot.history
                    .push_back(Arc::new(previous.with_active(false)));
                while slot.history.len() > self.history_depth {
                    if let Some(dropped) = slot.history.pop_front() {
                        info!(
                            model = name,
                            version = %dropped.version,
                            "Dropped oldest version from rollback history"
                        );
                    }
                }
                slot.history.len()
            }
            None => {
                info!(model = name, version = version, "Model loaded");
                slots.insert(
                    name.to_string(),
                    ModelSlot {
                        active: Arc::clone(&entry),
                        history: VecDeque::new(),
                    },
                );
                0
            }
        };

        entry.info(history_depth)
    }

    /// Run inference on the active version of `name`
    pub async fn predict(&self, name: &str, rows: &[Vec<f64>]) -> Result<Prediction> {
        let entry = self.active(name).await?;

        let output = entry
            .predictor
            .predict(rows)
            .map_err(|source| RegistryError::PredictionFailed {
                name: name.to_string(),
                source,
            })?;
        entry.request_count.fetch_add(1, Ordering::Relaxed);

        Ok(Prediction {
            output,
            version: entry.version.clone(),
        })
    }

    /// Reactivate the most recently superseded version.
    ///
    /// The current active entry is discarded. Returns the restored version's
    /// info as of the swap.
    pub async fn rollback(&self, name: &str) -> Result<ModelInfo> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let previous = slot
            .history
            .pop_back()
            .ok_or_else(|| RegistryError::NoHistory(name.to_string()))?;
        let restored = Arc::new(previous.with_active(true));
        let discarded = std::mem::replace(&mut slot.active, Arc::clone(&restored));

        info!(
            model = name,
            from_version = %discarded.version,
            to_version = %restored.version,
            "Model rolled back"
        );

        Ok(restored.info(slot.history.len()))
    }

    /// Unload `name` and forget its history
    pub async fn delete(&self, name: &str) -> Result<Arc<ModelEntry>> {
        let removed = self
            .slots
            .write()
            .await
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if removed.history.is_empty() {
            info!(model = name, version = %removed.active.version, "Model unloaded");
        } else {
            warn!(
                model = name,
                version = %removed.active.version,
                discarded_history = removed.history.len(),
                "Model unloaded with rollback history"
            );
        }

        Ok(removed.active)
    }

    /// Current active entry for `name`
    pub async fn active(&self, name: &str) -> Result<Arc<ModelEntry>> {
        self.slots
            .read()
            .await
            .get(name)
            .map(|slot| Arc::clone(&slot.active))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Versions available for rollback, most recent first
    pub async fn history(&self, name: &str) -> Result<Vec<Arc<ModelEntry>>> {
        self.slots
            .read()
            .await
            .get(name)
            .map(|slot| slot.history.iter().rev().cloned().collect())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All active models, most recently deployed first
    pub async fn list(&self) -> Vec<ModelInfo> {
        let slots = self.slots.read().await;
        let mut infos: Vec<ModelInfo> = slots
            .values()
            .map(|slot| slot.active.info(slot.history.len()))
            .collect();
        infos.sort_by(|a, b| b.deployed_at.cmp(&a.deployed_at));
        infos
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::LinearModel;

    fn model(bias: f64) -> Arc<dyn Predictor> {
        Arc::new(LinearModel {
            weights: vec![1.0],
            bias,
            threshold: None,
        })
    }

    #[tokio::test]
    async fn test_predict_unknown_model_is_not_found() {
        let registry = ModelRegistry::default();
        let err = registry.predict("iris", &[vec![1.0]]).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "iris"));
    }

    #[tokio::test]
    async fn test_predict_after_load_reports_version() {
        let registry = ModelRegistry::default();
        registry.load("iris", "1", model(0.0), 0.9, None).await;

        let prediction = registry.predict("iris", &[vec![2.0]]).await.unwrap();
        assert_eq!(prediction.version, "1");
        assert_eq!(prediction.output, vec![JsonValue::from(2.0)]);
        assert_eq!(registry.active("iris").await.unwrap().request_count(), 1);
    }

    #[tokio::test]
    async fn test_reload_pushes_previous_to_history() {
        let registry = ModelRegistry::default();
        registry.load("iris", "1", model(0.0), 0.8, None).await;
        registry.load("iris", "2", model(1.0), 0.9, None).await;

        let active = registry.active("iris").await.unwrap();
        assert_eq!(active.version, "2");
        assert!(active.is_active);

        let history = registry.history("iris").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, "1");
        assert!(!history[0].is_active);
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_previous_entry() {
        let registry = ModelRegistry::default();
        let first_predictor = model(0.0);
        let pipeline = Uuid::new_v4();
        let first = registry
            .load("iris", "1", Arc::clone(&first_predictor), 0.81, Some(pipeline))
            .await;
        registry.load("iris", "2", model(5.0), 0.93, None).await;

        let restored = registry.rollback("iris").await.unwrap();
        assert_eq!(restored.version, "1");
        assert_eq!(restored.accuracy, 0.81);
        assert_eq!(restored.pipeline_id, Some(pipeline));
        assert_eq!(restored.deployed_at, first.deployed_at);
        assert!(restored.is_active);
        assert_eq!(restored.history_depth, 0);
        let active = registry.active("iris").await.unwrap();
        assert!(Arc::ptr_eq(&active.predictor, &first_predictor));

        let prediction = registry.predict("iris", &[vec![1.0]]).await.unwrap();
        assert_eq!(prediction.version, "1");

        let err = registry.rollback("iris").await.unwrap_err();
        assert!(matches!(err, RegistryError::NoHistory(_)));
    }

    #[tokio::test]
    async fn test_load_reports_info_of_its_own_swap() {
        let registry = ModelRegistry::default();
        let first = registry.load("iris", "1", model(0.0), 0.8, None).await;
        assert_eq!(first.version, "1");
        assert_eq!(first.history_depth, 0);

        let second = registry.load("iris", "2", model(0.0), 0.9, None).await;
        assert_eq!(second.version, "2");
        assert_eq!(second.history_depth, 1);

        // A later delete does not change what the load reported
        registry.delete("iris").await.unwrap();
        assert_eq!(second.model_name, "iris");
        assert!(second.is_active);
    }

    #[tokio::test]
    async fn test_rollback_unknown_model() {
        let registry = ModelRegistry::default();
        assert!(matches!(
            registry.rollback("ghost").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let registry = ModelRegistry::new(2);
        for v in 1..=5 {
            registry
                .load("iris", &v.to_string(), model(0.0), 0.9, None)
                .await;
        }
        let versions: Vec<String> = registry
            .history("iris")
            .await
            .unwrap()
            .iter()
            .map(|e| e.version.clone())
            .collect();
        assert_eq!(versions, vec!["4".to_string(), "3".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_unloads_model_and_history() {
        let registry = ModelRegistry::default();
        registry.load("iris", "1", model(0.0), 0.9, None).await;
        registry.load("iris", "2", model(0.0), 0.9, None).await;

        let removed = registry.delete("iris").await.unwrap();
        assert_eq!(removed.version, "2");
        assert!(matches!(
            registry.predict("iris", &[vec![1.0]]).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete("iris").await,
            Err(RegistryError::NotFound(_))
        ));

        // A fresh load starts without the old history
        registry.load("iris", "3", model(0.0), 0.9, None).await;
        assert!(registry.history("iris").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let registry = ModelRegistry::default();
        registry.load("a", "1", model(0.0), 0.9, None).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.load("b", "1", model(0.0), 0.9, None).await;

        let names: Vec<String> = registry
            .list()
            .await
            .into_iter()
            .map(|m| m.model_name)
            .collect();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_same_name_lose_nothing() {
        let registry = Arc::new(ModelRegistry::default());
        registry.load("iris", "1", model(0.0), 0.9, None).await;

        let a = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load("iris", "2", model(0.0), 0.9, None).await })
        };
        let b = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load("iris", "3", model(0.0), 0.9, None).await })
        };
        a.await.unwrap();
        b.await.unwrap();

        let active = registry.active("iris").await.unwrap().version.clone();
        let history: Vec<String> = registry
            .history("iris")
            .await
            .unwrap()
            .iter()
            .map(|e| e.version.clone())
            .collect();

        let loser = if active == "2" { "3" } else { "2" };
        assert!(active == "2" || active == "3");
        assert_eq!(history, vec![loser.to_string(), "1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_predict_during_reloads_sees_consistent_versions() {
        let registry = Arc::new(ModelRegistry::default());
        // version N always predicts N for input 0
        registry.load("m", "0", model(0.0), 0.9, None).await;

        let writer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for v in 1..50 {
                    registry
                        .load("m", &v.to_string(), model(v as f64), 0.9, None)
                        .await;
                }
            })
        };

        for _ in 0..200 {
            let p = registry.predict("m", &[vec![0.0]]).await.unwrap();
            let expected: f64 = p.version.parse().unwrap();
            assert_eq!(p.output, vec![JsonValue::from(expected)]);
        }

        writer.await.unwrap();
    }
}
