//! Error types for the SONiC Salt deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SSH error: {0}")]
    SshError(#[from] russh::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Unknown SONiC version: {0}")]
    VersionError(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Vault error: {0}")]
    VaultError(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Inventory error: {0}")]
    InventoryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
