use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_model_server::api::{self, AppState};
use forge_model_server::config::Config;
use forge_model_server::predictor::FileLoader;
use forge_model_server::registry::ModelRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_model_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Forge Model Server...");

    let config = Config::from_env()?;
    config.validate()?;

    tokio::fs::create_dir_all(&config.models_base_path)
        .await
        .with_context(|| {
            format!(
                "Failed to create models directory {}",
                config.models_base_path.display()
            )
        })?;

    let state = AppState {
        registry: Arc::new(ModelRegistry::new(config.history_depth)),
        loader: Arc::new(FileLoader::new(config.models_base_path.clone())),
    };

    let app = api::create_router(state.clone());

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    tracing::info!(
        models_in_memory = state.registry.len().await,
        "Model server stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
