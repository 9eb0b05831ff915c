//! Log DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::LogEvent;

/// Snapshot of every known event for a pipeline, in emission order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLogs {
    pub pipeline_id: Uuid,
    pub logs: Vec<LogEvent>,
}
