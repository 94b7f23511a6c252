//! Error types for toolforge operations
//!
//! Tool invocations never fail with these; they return a
//! [`ToolExecutionResult`](crate::tools::ToolExecutionResult) carrying a
//! [`ToolError`](crate::tools::ToolError). `ForgeError` covers everything
//! around invocation: registering specifications, loading configuration,
//! reading spec files.

use crate::dynamic::{RegistryError, ValidationError};

/// Result type for toolforge operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Error types for the toolforge crates
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Specification rejected by the validator
    #[error("Invalid tool specification: {0}")]
    Validation(#[from] ValidationError),

    /// Registry lookup or state transition failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A dynamic tool would shadow a built-in tool
    #[error("Tool name '{0}' is reserved by a built-in tool")]
    ReservedName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ForgeError {
    fn from(s: String) -> Self {
        ForgeError::Other(s)
    }
}

impl From<&str> for ForgeError {
    fn from(s: &str) -> Self {
        ForgeError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ForgeError {
    fn from(err: anyhow::Error) -> Self {
        ForgeError::Other(err.to_string())
    }
}
