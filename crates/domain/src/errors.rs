//! Error types used throughout the domain layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for PhiVault domain operations
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum PhiVaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for PhiVault domain operations
pub type Result<T> = std::result::Result<T, PhiVaultError>;

impl From<serde_json::Error> for PhiVaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
