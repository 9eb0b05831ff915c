use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_client::ModelServerClient;
use forge_orchestrator::api::{self, AppState};
use forge_orchestrator::collaborators::{
    Collaborators, FileTracker, HttpModelDeployer, HttpNotebookSource, PapermillExecutor,
    TagValidator,
};
use forge_orchestrator::config::Config;
use forge_orchestrator::db;
use forge_orchestrator::service::event_bus::EventBus;
use forge_orchestrator::service::orchestrator::{Orchestrator, OrchestratorSettings};
use forge_orchestrator::store::{MemoryStore, PgStore, PipelineStore};

/// How often expired events are dropped from the event bus
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Forge Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    let store = create_store(&config).await?;

    let orphan_after = chrono::Duration::from_std(config.orphan_after)
        .context("ORPHAN_AFTER is out of range")?;
    match store
        .count_stale_running(chrono::Utc::now() - orphan_after)
        .await
    {
        Ok(0) => {}
        Ok(orphans) => tracing::warn!(
            orphans,
            "Found runs still marked running with no recent activity; they will not be resumed"
        ),
        Err(e) => tracing::warn!("Failed to count orphaned runs: {}", e),
    }

    tokio::fs::create_dir_all(&config.workspace)
        .await
        .with_context(|| format!("Failed to create workspace {}", config.workspace.display()))?;

    let bus = Arc::new(EventBus::new(config.event_retention));
    spawn_sweeper(Arc::clone(&bus));

    let model_server = ModelServerClient::new(config.model_server_url.clone());
    let collaborators = Collaborators {
        source: Arc::new(HttpNotebookSource::new(
            config.notebook_base_url.clone(),
            config.notebook_token.clone(),
        )),
        validator: Arc::new(TagValidator),
        executor: Arc::new(PapermillExecutor::new(
            config.papermill_bin.clone(),
            config.notebook_timeout,
        )),
        tracker: Arc::new(FileTracker),
        deployer: Arc::new(HttpModelDeployer::new(model_server.clone())),
    };

    let orchestrator = Arc::new(Orchestrator::start(
        Arc::clone(&store),
        Arc::clone(&bus),
        collaborators,
        OrchestratorSettings {
            workers: config.workers,
            auto_deploy: config.auto_deploy,
            min_accuracy: config.min_accuracy,
            workspace: config.workspace.clone(),
        },
    ));

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        store,
        bus,
        orchestrator,
        model_server,
        orphan_after,
        stream_grace: config.stream_grace,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    tracing::info!("Orchestrator stopped");
    Ok(())
}

async fn create_store(config: &Config) -> anyhow::Result<Arc<dyn PipelineStore>> {
    if config.uses_memory_store() {
        tracing::warn!("Using the in-memory store; runs will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(Arc::new(PgStore::new(pool)))
}

/// Periodically drop expired events from the bus
fn spawn_sweeper(bus: Arc<EventBus>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let dropped = bus.prune();
            if dropped > 0 {
                tracing::debug!(dropped, topics = bus.topic_count(), "Pruned expired log events");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
