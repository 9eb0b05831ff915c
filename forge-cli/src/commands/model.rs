//! Model command handlers
//!
//! Talks to the model server: listing served models, running predictions,
//! rolling back, unloading and loading artifacts by hand.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use forge_client::ModelServerClient;
use forge_core::domain::model::ModelInfo;
use forge_core::dto::model::LoadModel;

use crate::config::Config;
use crate::types::parse_rows;

/// Model subcommands
#[derive(Subcommand)]
pub enum ModelCommands {
    /// List active models
    List,
    /// Run a prediction against the active version
    Predict {
        /// Model name
        name: String,

        /// Feature rows as JSON, e.g. '[[5.1, 3.5, 1.4, 0.2]]'
        #[arg(short, long)]
        data: String,
    },
    /// Reactivate the previous version
    Rollback {
        /// Model name
        name: String,
    },
    /// Unload a model and its history
    Delete {
        /// Model name
        name: String,
    },
    /// Load an artifact and activate it
    Load {
        /// Model name
        name: String,

        /// Version label
        #[arg(short, long)]
        version: String,

        /// Artifact location understood by the model server
        #[arg(short, long)]
        artifact: String,

        /// Accuracy to record with the version
        #[arg(long, default_value = "0.0")]
        accuracy: f64,
    },
}

/// Handle model commands
pub async fn handle_model_command(command: ModelCommands, config: &Config) -> Result<()> {
    let client = ModelServerClient::new(&config.model_server_url);

    match command {
        ModelCommands::List => list_models(&client).await,
        ModelCommands::Predict { name, data } => predict(&client, &name, &data).await,
        ModelCommands::Rollback { name } => rollback(&client, &name).await,
        ModelCommands::Delete { name } => delete_model(&client, &name).await,
        ModelCommands::Load {
            name,
            version,
            artifact,
            accuracy,
        } => {
            let req = LoadModel {
                version,
                artifact_location: artifact,
                accuracy,
                pipeline_id: None,
            };
            load_model(&client, &name, &req).await
        }
    }
}

async fn list_models(client: &ModelServerClient) -> Result<()> {
    let models = client.list_models().await?;

    if models.is_empty() {
        println!("{}", "No models loaded.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} model(s):", models.len()).bold());
    println!();
    for model in &models {
        print_model_summary(model);
    }

    Ok(())
}

async fn predict(client: &ModelServerClient, name: &str, data: &str) -> Result<()> {
    let rows = parse_rows(data)?;
    let response = client.predict(name, rows).await?;

    println!(
        "{} {} {}",
        "Prediction from".bold(),
        response.model_name.cyan(),
        format!("v{}", response.version).dimmed()
    );
    for (i, value) in response.prediction.iter().enumerate() {
        println!("  [{}] {}", i, value);
    }

    Ok(())
}

async fn rollback(client: &ModelServerClient, name: &str) -> Result<()> {
    let info = client.rollback(name).await?;

    println!(
        "{}",
        format!("✓ Model '{}' rolled back to version {}", info.model_name, info.version)
            .green()
            .bold()
    );
    print_model_summary(&info);

    Ok(())
}

async fn delete_model(client: &ModelServerClient, name: &str) -> Result<()> {
    let response = client.delete_model(name).await?;

    println!("{}", format!("✓ {}", response.message).green().bold());

    Ok(())
}

async fn load_model(client: &ModelServerClient, name: &str, req: &LoadModel) -> Result<()> {
    let info = client.load_model(name, req).await?;

    println!(
        "{}",
        format!("✓ Model '{}' version {} is active", info.model_name, info.version)
            .green()
            .bold()
    );
    print_model_summary(&info);

    Ok(())
}

fn print_model_summary(model: &ModelInfo) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        model.model_name.bold(),
        format!("v{}", model.version).cyan()
    );
    println!("    Accuracy: {:.4}", model.accuracy);
    println!(
        "    Deployed: {}",
        model
            .deployed_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!("    Requests: {}", model.request_count);
    println!("    Rollback: {} version(s) available", model.history_depth);
    if let Some(pipeline_id) = model.pipeline_id {
        println!("    Pipeline: {}", pipeline_id.to_string().dimmed());
    }
    println!();
}
