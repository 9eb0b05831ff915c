//! Forge HTTP Clients
//!
//! Type-safe HTTP clients for the Forge services:
//! - [`OrchestratorClient`] talks to the pipeline orchestrator (trigger, query, cancel)
//! - [`ModelServerClient`] talks to the model server (serving surface and the
//!   deploy callback used by the orchestrator's deploy phase)
//!
//! # Example
//!
//! ```no_run
//! use forge_client::OrchestratorClient;
//! use forge_core::dto::pipeline::EnqueueRun;
//!
//! # async fn example() -> forge_client::Result<()> {
//! let client = OrchestratorClient::new("http://localhost:8080");
//!
//! let accepted = client.trigger_run(&EnqueueRun {
//!     repo_id: 1,
//!     commit_sha: "9fceb02".to_string(),
//!     notebook_ref: "notebooks/train.ipynb".to_string(),
//! }).await?;
//!
//! println!("Queued pipeline: {}", accepted.pipeline_id);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod models;
mod pipelines;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the orchestrator API
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use forge_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// HTTP client for the model server API
#[derive(Debug, Clone)]
pub struct ModelServerClient {
    /// Base URL of the model server (e.g., "http://localhost:8001")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ModelServerClient {
    /// Create a new model server client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new model server client with a custom HTTP client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            client,
        }
    }

    /// Get the base URL of the model server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn normalize_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Turn a non-2xx response into [`ClientError::ApiError`]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::api_error(status.as_u16(), body))
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    check_status(response)
        .await?
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    check_status(response).await.map(drop)
}
