//! Error types for CLI operations.

use contracts::ContractError;
use dedup::DedupError;
use dispatcher::DispatcherError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or failed validation
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ContractError),

    /// Dedup cache could not be created
    #[error("Dedup cache setup failed: {0}")]
    Dedup(#[from] DedupError),

    /// Dispatcher setup or execution error
    #[error("Pipeline execution failed: {0}")]
    Pipeline(#[from] DispatcherError),

    /// Generic error wrapper
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
