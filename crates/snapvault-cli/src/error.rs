//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Deploy(#[from] snapvault_fs::DeployError),

    #[error("{0}")]
    Common(#[from] snapvault_common::Error),

    #[error("logging setup failed: {0}")]
    Telemetry(#[from] snapvault_common::telemetry::TelemetryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read registry credentials {path}: {source}")]
    RegistryCredentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("no file-system store is deployed in namespace {namespace}")]
    NotDeployed { namespace: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
