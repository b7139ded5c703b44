//! Error types for the orgperm CLI
//!
//! Exit codes:
//! - 1: general failure (storage, configuration, I/O)
//! - 4: invalid input
//! - 6: a department, sub-group, user or conflict was not found

use orgperm_governance::{ConfigError, GovernanceError};
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Engine(GovernanceError),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation(_) => 4,
            CliError::NotFound(_) => 6,
            CliError::Config(_) | CliError::Engine(_) | CliError::Output(_) => 1,
        }
    }

    /// Print the error to stderr
    pub fn print(&self) {
        if std::env::var("NO_COLOR").is_err() {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }
    }
}

impl From<GovernanceError> for CliError {
    fn from(e: GovernanceError) -> Self {
        match e {
            GovernanceError::RecordNotFound { .. } | GovernanceError::ConflictNotFound(_) => {
                CliError::NotFound(e.to_string())
            }
            GovernanceError::Validation { .. } | GovernanceError::InvalidSource { .. } => {
                CliError::Validation(e.to_string())
            }
            other => CliError::Engine(other),
        }
    }
}
