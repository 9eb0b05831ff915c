//! Model serving DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input rows for inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub data: Vec<Vec<f64>>,
}

/// Inference output, tagged with the version that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: Vec<serde_json::Value>,
    pub model_name: String,
    pub version: String,
}

/// Deploy callback body: load an artifact and activate it under a model name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModel {
    pub version: String,
    pub artifact_location: String,
    pub accuracy: f64,
    pub pipeline_id: Option<Uuid>,
}

/// Generic message response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Model server readiness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelServerReady {
    pub status: String,
    pub models_loaded: usize,
}
