//! Served model descriptions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of a registry entry (the predictor itself is never serialized)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub version: String,
    pub accuracy: f64,
    pub deployed_at: DateTime<Utc>,
    pub is_active: bool,
    pub pipeline_id: Option<Uuid>,
    /// Predictions served by this version
    #[serde(default)]
    pub request_count: u64,
    /// Number of versions available for rollback
    #[serde(default)]
    pub history_depth: usize,
}
