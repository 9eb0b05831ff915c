//! Predictors
//!
//! A predictor is anything that maps feature rows to outputs. The registry
//! treats it as opaque; this module provides the trait, the linear model used
//! for exported notebook artifacts, and the loader that turns an artifact
//! location into a live predictor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Anything that can serve predictions
pub trait Predictor: Send + Sync {
    /// Predict one output per input row
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<JsonValue>>;
}

/// Linear model exported as JSON
///
/// Without a threshold it returns the raw score; with one it acts as a
/// binary classifier returning `1` or `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl LinearModel {
    fn score(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.weights.len() {
            anyhow::bail!(
                "expected {} features per row, got {}",
                self.weights.len(),
                row.len()
            );
        }
        Ok(self
            .weights
            .iter()
            .zip(row)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias)
    }
}

impl Predictor for LinearModel {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<JsonValue>> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let score = self.score(row).with_context(|| format!("row {}", i))?;
                Ok(match self.threshold {
                    Some(t) => JsonValue::from(u8::from(score >= t)),
                    None => JsonValue::from(score),
                })
            })
            .collect()
    }
}

/// Resolves an artifact location into a predictor
#[async_trait]
pub trait PredictorLoader: Send + Sync {
    async fn load(&self, artifact_location: &str) -> Result<Arc<dyn Predictor>>;
}

/// File name looked up when the artifact location is a directory
pub const MODEL_FILE_NAME: &str = "model.json";

/// Loads JSON linear models from the local filesystem
///
/// Relative locations are resolved against `base_path`.
#[derive(Debug, Clone)]
pub struct FileLoader {
    base_path: PathBuf,
}

impl FileLoader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, artifact_location: &str) -> PathBuf {
        let location = artifact_location
            .strip_prefix("file://")
            .unwrap_or(artifact_location);
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl PredictorLoader for FileLoader {
    async fn load(&self, artifact_location: &str) -> Result<Arc<dyn Predictor>> {
        let mut path = self.resolve(artifact_location);
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Artifact not found: {}", path.display()))?;
        if metadata.is_dir() {
            path = path.join(MODEL_FILE_NAME);
        }

        debug!("Loading model artifact from {}", path.display());

        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let model: LinearModel = serde_json::from_slice(&raw)
            .with_context(|| format!("Artifact {} is not a linear model", path.display()))?;

        if model.weights.is_empty() {
            anyhow::bail!("Artifact {} has no weights", path.display());
        }

        Ok(Arc::new(model))
    }
}
