//! Model server configuration

use std::path::PathBuf;

use crate::registry::DEFAULT_HISTORY_DEPTH;

/// Model server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Base directory relative artifact locations are resolved against
    pub models_base_path: PathBuf,

    /// Superseded versions kept per model for rollback
    pub history_depth: usize,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - MODEL_SERVER_BIND_ADDR (default: 0.0.0.0:8001)
    /// - MODELS_BASE_PATH (default: ./models)
    /// - MODEL_HISTORY_DEPTH (default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("MODEL_SERVER_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let models_base_path = std::env::var("MODELS_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.models_base_path);

        let history_depth = match std::env::var("MODEL_HISTORY_DEPTH") {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("MODEL_HISTORY_DEPTH '{}' is invalid: {}", raw, e))?,
            Err(_) => defaults.history_depth,
        };

        Ok(Self {
            bind_addr,
            models_base_path,
            history_depth,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.history_depth == 0 {
            anyhow::bail!("history_depth must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".to_string(),
            models_base_path: PathBuf::from("./models"),
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8001");
        assert_eq!(config.history_depth, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.history_depth = 0;
        assert!(config.validate().is_err());

        config.history_depth = 3;
        config.bind_addr = String::new();
        assert!(config.validate().is_err());
    }
}
