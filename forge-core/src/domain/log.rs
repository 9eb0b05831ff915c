//! Live log event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Phase, PhaseName, PhaseStatus, RunStatus};

/// A phase transition as seen by live viewers
///
/// Ephemeral: the durable pipeline record stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub pipeline_id: Uuid,
    pub phase: PhaseName,
    /// Phase status at emission time
    pub status: PhaseStatus,
    pub logs: String,
    pub timestamp: DateTime<Utc>,
    /// Run status right after this transition
    pub run_status: RunStatus,
}

impl LogEvent {
    pub fn from_phase(pipeline_id: Uuid, phase: &Phase, run_status: RunStatus) -> Self {
        Self {
            pipeline_id,
            phase: phase.name,
            status: phase.status,
            logs: phase.logs.clone(),
            timestamp: phase.timestamp,
            run_status,
        }
    }

    /// Whether this event closes the run's event sequence
    pub fn is_terminal(&self) -> bool {
        self.run_status.is_terminal()
    }
}
