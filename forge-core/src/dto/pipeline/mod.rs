//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineRun, RunStatus};

/// Request to enqueue a pipeline run (trigger intake)
///
/// The caller is expected to have verified the trigger's authenticity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRun {
    pub repo_id: i64,
    pub commit_sha: String,
    pub notebook_ref: String,
}

impl EnqueueRun {
    /// Check the request is well-formed
    pub fn validate(&self) -> Result<(), String> {
        if self.repo_id <= 0 {
            return Err(format!("repo_id must be positive, got {}", self.repo_id));
        }
        let sha = self.commit_sha.trim();
        if sha.is_empty() {
            return Err("commit_sha cannot be empty".to_string());
        }
        if sha.len() > 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("commit_sha '{}' is not a hex digest", self.commit_sha));
        }
        let notebook = self.notebook_ref.trim();
        if notebook.is_empty() {
            return Err("notebook_ref cannot be empty".to_string());
        }
        if !notebook.ends_with(".ipynb") {
            return Err(format!("notebook_ref '{}' is not a notebook", notebook));
        }
        Ok(())
    }
}

/// Acknowledgement returned when a run is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAccepted {
    pub status: RunStatus,
    pub pipeline_id: Uuid,
}

/// Acknowledgement of a cancel request
///
/// `status` is the run status right after the request: `failed` when the run
/// was still queued, `running` when it stops at its next phase boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAccepted {
    pub pipeline_id: Uuid,
    pub status: RunStatus,
}

/// A pipeline run as returned by the query API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunView {
    #[serde(flatten)]
    pub run: PipelineRun,
    /// Still `running` but no phase activity for longer than the orphan threshold
    pub possibly_orphaned: bool,
}

/// Paging parameters for pipeline listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

pub const MAX_PAGE_SIZE: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    20
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_size(),
        }
    }
}

impl PageQuery {
    pub fn validate(&self) -> Result<(), String> {
        if self.page == 0 {
            return Err("page must be >= 1".to_string());
        }
        if self.size == 0 || self.size > MAX_PAGE_SIZE {
            return Err(format!("size must be between 1 and {}", MAX_PAGE_SIZE));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }
}

/// One page of pipeline runs, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePage {
    pub items: Vec<PipelineRunView>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(repo_id: i64, sha: &str, notebook: &str) -> EnqueueRun {
        EnqueueRun {
            repo_id,
            commit_sha: sha.to_string(),
            notebook_ref: notebook.to_string(),
        }
    }

    #[test]
    fn test_enqueue_validation() {
        assert!(request(1, "9fceb02", "notebooks/train.ipynb").validate().is_ok());
        assert!(request(0, "9fceb02", "notebooks/train.ipynb").validate().is_err());
        assert!(request(1, "", "notebooks/train.ipynb").validate().is_err());
        assert!(request(1, "not-a-sha", "notebooks/train.ipynb").validate().is_err());
        assert!(request(1, "9fceb02", "").validate().is_err());
        assert!(request(1, "9fceb02", "README.md").validate().is_err());
    }

    #[test]
    fn test_page_query() {
        let query = PageQuery { page: 3, size: 20 };
        assert!(query.validate().is_ok());
        assert_eq!(query.offset(), 40);

        assert!(PageQuery { page: 0, size: 20 }.validate().is_err());
        assert!(PageQuery { page: 1, size: 0 }.validate().is_err());
        assert!(PageQuery { page: 1, size: 101 }.validate().is_err());
    }

    #[test]
    fn test_run_view_flattens_run() {
        let view = PipelineRunView {
            run: PipelineRun::new(7, "abc", "nb.ipynb"),
            possibly_orphaned: false,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["repo_id"], 7);
        assert_eq!(json["status"], "queued");
        assert_eq!(json["possibly_orphaned"], false);
        assert_eq!(json["phases"].as_array().unwrap().len(), 5);
    }
}
