//! Server-level error types.

use std::path::PathBuf;

use backplane_mcp_protocol::{BackplaneError, ProviderType};

/// Errors loading the TOML server configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Provider '{0}' is not enabled")]
    ProviderNotEnabled(ProviderType),
}

/// Errors building or running the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Settings rejected: {0}")]
    Settings(#[from] BackplaneError),

    #[error("Command '{0}' is registered twice")]
    DuplicateCommand(String),

    #[error("No providers enabled")]
    NoProviders,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}
