//! Pipeline Repository
//!
//! Handles all database operations related to pipeline runs.

use chrono::{DateTime, Utc};
use forge_core::domain::pipeline::{Metrics, Phase, PipelineRun, RunStatus};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Insert a new run
pub async fn create(pool: &PgPool, run: &PipelineRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipelines (
            id, repo_id, commit_sha, notebook_ref, status, phases, metrics,
            reason, created_at, started_at, finished_at, last_activity_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(run.id)
    .bind(run.repo_id)
    .bind(&run.commit_sha)
    .bind(&run.notebook_ref)
    .bind(run.status.as_str())
    .bind(Json(&run.phases))
    .bind(Json(&run.metrics))
    .bind(&run.reason)
    .bind(run.created_at)
    .bind(run.started_at)
    .bind(run.finished_at)
    .bind(run.last_activity())
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a run by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, repo_id, commit_sha, notebook_ref, status, phases, metrics,
               reason, created_at, started_at, finished_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Lock a run for the rest of the transaction `conn` belongs to
pub async fn find_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, repo_id, commit_sha, notebook_ref, status, phases, metrics,
               reason, created_at, started_at, finished_at
        FROM pipelines
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Write back every mutable column of a run
pub async fn save_state(conn: &mut PgConnection, run: &PipelineRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE pipelines
        SET status = $1, phases = $2, metrics = $3, reason = $4,
            started_at = $5, finished_at = $6, last_activity_at = $7
        WHERE id = $8
        "#,
    )
    .bind(run.status.as_str())
    .bind(Json(&run.phases))
    .bind(Json(&run.metrics))
    .bind(&run.reason)
    .bind(run.started_at)
    .bind(run.finished_at)
    .bind(run.last_activity())
    .bind(run.id)
    .execute(conn)
    .await?;

    Ok(())
}

/// List one page of runs, newest first
pub async fn list_page(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, repo_id, commit_sha, notebook_ref, status, phases, metrics,
               reason, created_at, started_at, finished_at
        FROM pipelines
        ORDER BY created_at DESC, id
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Count all runs
pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM pipelines")
        .fetch_one(pool)
        .await
}

/// Count running runs with no phase activity since `before`
pub async fn count_stale_running(pool: &PgPool, before: DateTime<Utc>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM pipelines WHERE status = $1 AND last_activity_at < $2",
    )
    .bind(RunStatus::Running.as_str())
    .bind(before)
    .fetch_one(pool)
    .await
}

/// Round-trip to the database
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    repo_id: i64,
    commit_sha: String,
    notebook_ref: String,
    status: String,
    phases: Json<Vec<Phase>>,
    metrics: Json<Metrics>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<PipelineRow> for PipelineRun {
    fn from(row: PipelineRow) -> Self {
        let phases = row.phases.0;
        let status = row.status.parse().unwrap_or_else(|e| {
            tracing::warn!(pipeline_id = %row.id, "{}; deriving status from phases", e);
            RunStatus::derive(&phases)
        });

        PipelineRun {
            id: row.id,
            repo_id: row.repo_id,
            commit_sha: row.commit_sha,
            notebook_ref: row.notebook_ref,
            status,
            phases,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            metrics: row.metrics.0,
            reason: row.reason,
        }
    }
}
