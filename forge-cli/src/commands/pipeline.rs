//! Pipeline command handlers
//!
//! Triggering runs, listing and inspecting them, reading or following their
//! logs, and cancelling them.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use forge_client::OrchestratorClient;
use forge_core::domain::log::LogEvent;
use forge_core::domain::pipeline::{PhaseStatus, RunStatus};
use forge_core::dto::pipeline::{EnqueueRun, PageQuery, PipelineRunView};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::RunRef;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Queue a pipeline run for a commit
    Trigger {
        /// Repository id
        #[arg(short, long)]
        repo_id: i64,

        /// Commit SHA to run
        #[arg(short, long)]
        commit: String,

        /// Notebook path within the repository
        #[arg(short, long)]
        notebook: String,
    },
    /// List pipeline runs, newest first
    List {
        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        size: u32,
    },
    /// Get run details
    Get {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
    /// Show run logs
    Logs {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Keep printing new events until the run finishes
        #[arg(short, long)]
        watch: bool,

        /// Seconds between polls while watching
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// Cancel a queued or running run
    Cancel {
        /// Pipeline ID or unambiguous prefix
        id: String,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        PipelineCommands::Trigger {
            repo_id,
            commit,
            notebook,
        } => trigger_run(&client, repo_id, commit, notebook).await,
        PipelineCommands::List { page, size } => list_pipelines(&client, page, size).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Logs {
            id,
            watch,
            interval,
        } => {
            let id = resolve_run_id(&client, &RunRef::parse(&id)).await?;
            if watch {
                watch_logs(&client, id, Duration::from_secs(interval.max(1))).await
            } else {
                show_logs(&client, id).await
            }
        }
        PipelineCommands::Cancel { id } => cancel_pipeline(&client, &id).await,
    }
}

async fn trigger_run(
    client: &OrchestratorClient,
    repo_id: i64,
    commit_sha: String,
    notebook_ref: String,
) -> Result<()> {
    let req = EnqueueRun {
        repo_id,
        commit_sha,
        notebook_ref,
    };
    let accepted = client.trigger_run(&req).await?;

    println!("{}", "✓ Pipeline run queued!".green().bold());
    println!("  ID:     {}", accepted.pipeline_id.to_string().cyan());
    println!("  Status: {}", colorize_run_status(accepted.status));
    println!(
        "  {}",
        format!("Follow with: forge pipeline logs {} --watch", accepted.pipeline_id).dimmed()
    );

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient, page: u32, size: u32) -> Result<()> {
    let listing = client.list_pipelines(PageQuery { page, size }).await?;

    if listing.items.is_empty() {
        println!("{}", "No pipeline runs found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Showing {} of {} run(s), page {}:",
            listing.items.len(),
            listing.total,
            listing.page
        )
        .bold()
    );
    println!();
    for view in &listing.items {
        print_run_summary(view);
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let id = resolve_run_id(client, &RunRef::parse(id)).await?;
    let view = client.get_pipeline(id).await?;

    print_run_details(&view);

    Ok(())
}

async fn show_logs(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let snapshot = client.get_logs(id).await?;

    if snapshot.logs.is_empty() {
        println!("{}", "No log events yet for this run.".yellow());
        return Ok(());
    }

    println!("{}", format!("Logs for pipeline {}:", id).bold());
    println!("{}", "─".repeat(80).dimmed());
    for event in &snapshot.logs {
        print_log_event(event);
    }
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

/// Poll the log snapshot and print events as they appear
async fn watch_logs(client: &OrchestratorClient, id: Uuid, interval: Duration) -> Result<()> {
    println!("{}", format!("Watching pipeline {} (Ctrl-C to stop)", id).bold());
    println!("{}", "─".repeat(80).dimmed());

    let mut printed = 0;
    loop {
        let snapshot = client.get_logs(id).await?;

        // A shorter snapshot means the server rebuilt it from stored phases
        if snapshot.logs.len() < printed {
            printed = 0;
        }

        for event in &snapshot.logs[printed..] {
            print_log_event(event);
        }
        printed = snapshot.logs.len();

        if let Some(last) = snapshot.logs.last().filter(|e| e.is_terminal()) {
            println!("{}", "─".repeat(80).dimmed());
            println!("Run finished: {}", colorize_run_status(last.run_status));
            return Ok(());
        }

        tokio::time::sleep(interval).await;
    }
}

async fn cancel_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let id = resolve_run_id(client, &RunRef::parse(id)).await?;

    match client.cancel_pipeline(id).await {
        Ok(accepted) => {
            let message = match accepted.status {
                RunStatus::Running => "✓ Cancellation requested; the run stops after its current phase",
                _ => "✓ Pipeline run cancelled",
            };
            println!("{}", message.green().bold());
            println!("  ID:     {}", accepted.pipeline_id.to_string().cyan());
            println!("  Status: {}", colorize_run_status(accepted.status));
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            println!("{}", format!("✗ {}", e).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_run_summary(view: &PipelineRunView) {
    let run = &view.run;
    let short_id = run.id.simple().to_string();

    println!(
        "  {} {} {}",
        "▸".cyan(),
        short_id[..8].bold(),
        colorize_run_status(run.status)
    );
    println!("    Notebook: {}", run.notebook_ref.dimmed());
    println!(
        "    Commit:   {} (repo {})",
        run.commit_sha.dimmed(),
        run.repo_id
    );
    println!(
        "    Created:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if view.possibly_orphaned {
        println!("    {}", "⚠ possibly orphaned: no activity recently".yellow());
    }
    println!();
}

fn print_run_details(view: &PipelineRunView) {
    let run = &view.run;

    println!("{}", "Pipeline Run:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Status:    {}", colorize_run_status(run.status));
    println!("  Repo:      {}", run.repo_id);
    println!("  Commit:    {}", run.commit_sha);
    println!("  Notebook:  {}", run.notebook_ref);
    println!("  Created:   {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = run.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(finished) = run.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = run.started_at {
            let duration = finished.signed_duration_since(started);
            println!("  Duration:  {}s", duration.num_seconds());
        }
    }

    if let Some(reason) = &run.reason {
        println!("  Reason:    {}", reason.red());
    }

    if view.possibly_orphaned {
        println!(
            "  {}",
            "⚠ Still marked running but inactive; the orchestrator that owned it may be gone"
                .yellow()
        );
    }

    println!("\n{}", "Phases:".bold());
    for phase in &run.phases {
        println!(
            "  {:<9} {:<8} {}",
            phase.name.to_string(),
            colorize_phase_status(phase.status),
            phase
                .timestamp
                .format("%H:%M:%S")
                .to_string()
                .dimmed()
        );
    }

    if !run.metrics.is_empty() {
        println!("\n{}", "Metrics:".bold());
        for (key, value) in &run.metrics {
            let value = serde_json::to_string(value).unwrap_or_default();
            println!("  {} = {}", key.cyan(), value);
        }
    }
}

fn print_log_event(event: &LogEvent) {
    println!(
        "{} [{}] {}",
        event.timestamp.format("%H:%M:%S").to_string().dimmed(),
        event.phase.to_string().cyan(),
        colorize_phase_status(event.status)
    );
    for line in event.logs.lines() {
        println!("    {}", line);
    }
}

fn colorize_run_status(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Queued => label.yellow(),
        RunStatus::Running => label.cyan(),
        RunStatus::Success => label.green(),
        RunStatus::Failed => label.red(),
    }
}

fn colorize_phase_status(status: PhaseStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        PhaseStatus::Pending => label.dimmed(),
        PhaseStatus::Running => label.cyan(),
        PhaseStatus::Success => label.green(),
        PhaseStatus::Failed => label.red(),
    }
}
