//! Experiment tracking on the local filesystem
//!
//! Each run gets a `tracking.json` record in its workspace with the run id,
//! tags, artifact location and metrics. A run that exported no model is still
//! tracked, just without an artifact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use forge_core::domain::pipeline::{METRIC_ACCURACY, MetricValue, Metrics};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{ExecutionOutput, ExperimentTracker, NotebookConfig, RunContext, TrackedRun};

pub const TRACKING_FILE: &str = "tracking.json";

#[derive(Debug, Clone, Default)]
pub struct FileTracker;

#[derive(Serialize)]
struct TrackingRecord<'a> {
    run_id: &'a str,
    experiment: String,
    tags: BTreeMap<&'static str, String>,
    artifact_location: Option<&'a str>,
    metrics: &'a Metrics,
}

#[async_trait]
impl ExperimentTracker for FileTracker {
    async fn record(
        &self,
        ctx: &RunContext,
        config: &NotebookConfig,
        output: &ExecutionOutput,
    ) -> Result<TrackedRun> {
        let metrics = read_metrics(output).await?;

        let artifact_location = if tokio::fs::metadata(&output.model_path).await.is_ok() {
            Some(format!("file://{}", output.model_path.display()))
        } else {
            tracing::warn!(
                pipeline_id = %ctx.pipeline_id,
                "Notebook did not export a model to {}",
                output.model_path.display()
            );
            None
        };

        let run_id = format!("{}-{}", config.model_name, ctx.short_id());

        let tags = BTreeMap::from([
            ("pipeline_id", ctx.pipeline_id.to_string()),
            ("commit_sha", ctx.commit_sha.clone()),
            ("model_name", config.model_name.clone()),
            ("version", config.version.clone()),
        ]);
        let record = TrackingRecord {
            run_id: &run_id,
            experiment: format!("forge-{}", config.model_name),
            tags,
            artifact_location: artifact_location.as_deref(),
            metrics: &metrics,
        };
        let body = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(ctx.workspace.join(TRACKING_FILE), body)
            .await
            .context("Failed to write tracking record")?;

        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            run_id = %run_id,
            "Tracked run"
        );

        Ok(TrackedRun {
            run_id,
            artifact_location,
            metrics,
        })
    }
}

/// Metrics the notebook wrote; accuracy defaults to 0.0 when absent
async fn read_metrics(output: &ExecutionOutput) -> Result<Metrics> {
    let mut metrics = match tokio::fs::read(&output.metrics_path).await {
        Ok(raw) => serde_json::from_slice::<Metrics>(&raw).with_context(|| {
            format!(
                "Metrics file {} must be an object of numbers and booleans",
                output.metrics_path.display()
            )
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Metrics::new(),
        Err(e) => {
            return Err(e).context(format!(
                "Failed to read metrics {}",
                output.metrics_path.display()
            ));
        }
    };

    metrics
        .entry(METRIC_ACCURACY.to_string())
        .or_insert(MetricValue::Number(0.0));

    Ok(metrics)
}
