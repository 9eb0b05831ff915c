//! Notebook execution through the papermill CLI

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::notebook::Notebook;
use super::{ExecutionOutput, NotebookConfig, NotebookExecutor, RunContext};

pub const INPUT_NOTEBOOK: &str = "input.ipynb";
pub const OUTPUT_NOTEBOOK: &str = "output.ipynb";
pub const MODEL_FILE: &str = "model.json";
pub const METRICS_FILE: &str = "metrics.json";

/// Characters of papermill stderr kept in error messages
const STDERR_TAIL: usize = 2000;

/// Runs notebooks with `papermill`, injecting `MODEL_OUTPUT_PATH`,
/// `PIPELINE_ID` and `METRICS_PATH` as parameters
#[derive(Debug, Clone)]
pub struct PapermillExecutor {
    binary: String,
    timeout: Duration,
}

impl PapermillExecutor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl NotebookExecutor for PapermillExecutor {
    async fn execute(
        &self,
        ctx: &RunContext,
        notebook: &[u8],
        config: &NotebookConfig,
    ) -> Result<ExecutionOutput> {
        tokio::fs::create_dir_all(&ctx.workspace)
            .await
            .with_context(|| format!("Failed to create workspace {}", ctx.workspace.display()))?;

        let input: PathBuf = ctx.workspace.join(INPUT_NOTEBOOK);
        let output = ExecutionOutput {
            output_notebook: ctx.workspace.join(OUTPUT_NOTEBOOK),
            model_path: ctx.workspace.join(MODEL_FILE),
            metrics_path: ctx.workspace.join(METRICS_FILE),
            cell_logs: Vec::new(),
        };

        tokio::fs::write(&input, notebook)
            .await
            .context("Failed to write input notebook")?;

        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            model = %config.model_name,
            "Executing notebook with {}",
            self.binary
        );

        let child = Command::new(&self.binary)
            .arg(&input)
            .arg(&output.output_notebook)
            .arg("-p")
            .arg("MODEL_OUTPUT_PATH")
            .arg(&output.model_path)
            .arg("-p")
            .arg("PIPELINE_ID")
            .arg(ctx.pipeline_id.to_string())
            .arg("-p")
            .arg("METRICS_PATH")
            .arg(&output.metrics_path)
            .arg("--cwd")
            .arg(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.binary))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("Notebook execution timed out after {:?}", self.timeout))?
            .context("Failed to wait for notebook execution")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!(
                "Notebook execution failed ({}): {}",
                result.status,
                tail(&stderr, STDERR_TAIL)
            );
        }

        let executed = tokio::fs::read(&output.output_notebook)
            .await
            .context("Failed to read executed notebook")?;
        let cell_logs = Notebook::parse(&executed)?.cell_logs();

        Ok(ExecutionOutput { cell_logs, ..output })
    }
}

fn tail(text: &str, max: usize) -> &str {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
