//! Pipeline run domain types
//!
//! A run moves through five phases in a fixed order. The run status is never
//! stored independently of the phases: it is derived from them every time a
//! phase changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Name of a pipeline phase, in canonical execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    Download,
    Validate,
    Execute,
    Register,
    Deploy,
}

impl PhaseName {
    /// All phases in execution order
    pub const ALL: [PhaseName; 5] = [
        PhaseName::Download,
        PhaseName::Validate,
        PhaseName::Execute,
        PhaseName::Register,
        PhaseName::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Download => "download",
            PhaseName::Validate => "validate",
            PhaseName::Execute => "execute",
            PhaseName::Register => "register",
            PhaseName::Deploy => "deploy",
        }
    }

    /// Position of this phase in the canonical order
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Success | PhaseStatus::Failed)
    }

    /// Whether a phase may move from `self` to `next`.
    ///
    /// `Pending -> Failed` is allowed for phases that are cancelled before they start.
    pub fn can_transition_to(&self, next: PhaseStatus) -> bool {
        use PhaseStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Success) | (Running, Failed)
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Success => "success",
            PhaseStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Derive the run status from its phases.
    pub fn derive(phases: &[Phase]) -> RunStatus {
        if phases.iter().any(|p| p.status == PhaseStatus::Failed) {
            RunStatus::Failed
        } else if !phases.is_empty() && phases.iter().all(|p| p.status == PhaseStatus::Success) {
            RunStatus::Success
        } else if phases.iter().all(|p| p.status == PhaseStatus::Pending) {
            RunStatus::Queued
        } else {
            RunStatus::Running
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// One stage of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: PhaseName,
    pub status: PhaseStatus,
    /// Time of the last status change
    pub timestamp: DateTime<Utc>,
    /// Accumulated log text, append-only
    #[serde(default)]
    pub logs: String,
}

impl Phase {
    pub fn pending(name: PhaseName, at: DateTime<Utc>) -> Self {
        Self {
            name,
            status: PhaseStatus::Pending,
            timestamp: at,
            logs: String::new(),
        }
    }

    /// Copy of this phase with a new status, stamped now
    pub fn with_status(&self, status: PhaseStatus) -> Self {
        Self {
            name: self.name,
            status,
            timestamp: Utc::now(),
            logs: self.logs.clone(),
        }
    }

    /// Copy of this phase with `line` appended to its logs
    pub fn with_log(mut self, line: impl AsRef<str>) -> Self {
        let line = line.as_ref();
        if line.is_empty() {
            return self;
        }
        if !self.logs.is_empty() && !self.logs.ends_with('\n') {
            self.logs.push('\n');
        }
        self.logs.push_str(line);
        self
    }
}

/// A metric value recorded for a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            MetricValue::Number(_) => None,
        }
    }
}

pub type Metrics = BTreeMap<String, MetricValue>;

/// Metric key holding the model accuracy reported by the tracker
pub const METRIC_ACCURACY: &str = "accuracy";
/// Metric key recording the deploy decision
pub const METRIC_DEPLOYED: &str = "deployed";

/// Reason recorded on runs stopped by a cancel request
pub const REASON_CANCELLED: &str = "cancelled";

/// Rejected phase update
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("phase {phase} cannot move from {from} to {to}")]
    NonMonotonic {
        phase: PhaseName,
        from: PhaseStatus,
        to: PhaseStatus,
    },

    #[error("phase {phase} cannot start before {blocking} has succeeded")]
    OutOfOrder {
        phase: PhaseName,
        blocking: PhaseName,
    },

    #[error("logs of phase {0} can only be appended to")]
    LogsRewritten(PhaseName),

    #[error("run has no phase named {0}")]
    MissingPhase(PhaseName),
}

/// A single pipeline execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub repo_id: i64,
    pub commit_sha: String,
    pub notebook_ref: String,
    pub status: RunStatus,
    pub phases: Vec<Phase>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: Metrics,
    /// Why the run failed, if it did
    #[serde(default)]
    pub reason: Option<String>,
}

impl PipelineRun {
    /// Create a queued run with every phase pending
    pub fn new(repo_id: i64, commit_sha: impl Into<String>, notebook_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repo_id,
            commit_sha: commit_sha.into(),
            notebook_ref: notebook_ref.into(),
            status: RunStatus::Queued,
            phases: PhaseName::ALL
                .iter()
                .map(|name| Phase::pending(*name, now))
                .collect(),
            created_at: now,
            started_at: None,
            finished_at: None,
            metrics: Metrics::new(),
            reason: None,
        }
    }

    pub fn phase(&self, name: PhaseName) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// First phase that has not started yet
    pub fn next_pending(&self) -> Option<&Phase> {
        self.phases.iter().find(|p| p.status == PhaseStatus::Pending)
    }

    /// Apply a phase update.
    ///
    /// Returns `Ok(false)` when the update is identical to the stored phase.
    /// Re-derives the run status and stamps `started_at`/`finished_at`.
    pub fn apply_phase(&mut self, update: &Phase) -> Result<bool, TransitionError> {
        let idx = self
            .phases
            .iter()
            .position(|p| p.name == update.name)
            .ok_or(TransitionError::MissingPhase(update.name))?;

        let current = &self.phases[idx];
        if current.status == update.status {
            if current.logs == update.logs {
                return Ok(false);
            }
            if !update.logs.starts_with(&current.logs) {
                return Err(TransitionError::LogsRewritten(update.name));
            }
        } else if !current.status.can_transition_to(update.status) {
            return Err(TransitionError::NonMonotonic {
                phase: update.name,
                from: current.status,
                to: update.status,
            });
        }

        if update.status == PhaseStatus::Running {
            if let Some(blocking) = self.phases[..idx]
                .iter()
                .find(|p| p.status != PhaseStatus::Success)
            {
                return Err(TransitionError::OutOfOrder {
                    phase: update.name,
                    blocking: blocking.name,
                });
            }
        }

        self.phases[idx] = update.clone();
        self.status = RunStatus::derive(&self.phases);

        if self.started_at.is_none() && self.status != RunStatus::Queued {
            self.started_at = Some(update.timestamp);
        }
        if self.status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(update.timestamp);
        }

        Ok(true)
    }

    /// Accuracy reported by the tracker, if any
    pub fn accuracy(&self) -> Option<f64> {
        self.metrics.get(METRIC_ACCURACY).and_then(MetricValue::as_f64)
    }

    /// Whether the deploy phase activated a model
    pub fn deployed(&self) -> Option<bool> {
        self.metrics.get(METRIC_DEPLOYED).and_then(MetricValue::as_bool)
    }

    /// Newest timestamp across all phases
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.phases
            .iter()
            .map(|p| p.timestamp)
            .max()
            .unwrap_or(self.created_at)
    }

    /// A run still marked running with no phase activity for longer than
    /// `stale_after` was most likely interrupted by a crash.
    pub fn is_possibly_orphaned(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.status == RunStatus::Running && now - self.last_activity() > stale_after
    }
}
