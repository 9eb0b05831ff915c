//! Forge CLI
//!
//! Command-line interface for the Forge orchestrator and model server.

mod commands;
mod config;
mod id_resolver;
mod types;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use forge_client::ClientError;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Forge ML Pipeline CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "FORGE_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    /// Model server URL
    #[arg(
        long,
        env = "FORGE_MODEL_SERVER_URL",
        default_value = "http://localhost:8001"
    )]
    model_server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
        model_server_url: cli.model_server_url,
    };

    match handle_command(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);
    if let Some(hint) = err.downcast_ref::<ClientError>().and_then(hint_for) {
        eprintln!("  {}", hint.dimmed());
    }
}

fn hint_for(err: &ClientError) -> Option<&'static str> {
    match err {
        ClientError::RequestFailed(_) => {
            Some("Is the service running? Check --orchestrator-url / --model-server-url.")
        }
        e if e.is_server_error() => {
            Some("The service failed while handling the request; see its logs.")
        }
        e if e.is_not_found() => None,
        e if e.is_client_error() => Some("The request was rejected; check the arguments."),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_for_api_errors() {
        assert!(hint_for(&ClientError::api_error(503, "{}")).unwrap().contains("logs"));
        assert!(hint_for(&ClientError::api_error(400, "{}")).unwrap().contains("arguments"));
        assert!(hint_for(&ClientError::api_error(404, "{}")).is_none());
        assert!(hint_for(&ClientError::ParseError("eof".to_string())).is_none());
    }
}
