//! Error types for Orbiter

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using OrbiterError
pub type Result<T> = std::result::Result<T, OrbiterError>;

/// Main error type for Orbiter core operations
#[derive(Debug, Error)]
pub enum OrbiterError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Toolchain discovery errors
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Toolchain discovery errors
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// A required tool could not be located
    #[error("Required tool '{tool}' not found. {install_hint}")]
    ToolNotFound { tool: String, install_hint: String },

    /// A configured path does not exist
    #[error("Configured {what} does not exist: {path}")]
    MissingPath { what: String, path: PathBuf },
}

impl OrbiterError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
