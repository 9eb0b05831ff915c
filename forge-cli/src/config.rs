//! Configuration module
//!
//! Service endpoints the CLI talks to.

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,

    /// URL of the model server
    pub model_server_url: String,
}
