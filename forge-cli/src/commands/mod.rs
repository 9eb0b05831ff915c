//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod model;
mod pipeline;

pub use model::ModelCommands;
pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline runs: trigger, inspect, follow and cancel
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Served models: list, predict, roll back and unload
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
}

/// Route a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Model { command } => model::handle_model_command(command, config).await,
    }
}
