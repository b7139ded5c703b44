//! Error types for the permission engine.

use orgperm_core::CoreError;
use thiserror::Error;

/// Errors that can occur in identity reconciliation and permission writes.
///
/// None of these are fatal to the process; every failed write leaves the
/// stored state exactly as it was.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A department, sub-group or user id did not resolve against the current
    /// hierarchy snapshot.
    #[error("{resource} not found: {id}")]
    RecordNotFound {
        /// Kind of record (e.g. "Department").
        resource: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// No duplicate-email conflict exists for the email.
    #[error("No conflict found for email: {0}")]
    ConflictNotFound(String),

    /// The chosen source is not part of the conflict.
    #[error("Source '{source_name}' is not part of the conflict for {email}")]
    InvalidSource {
        /// The conflicting email.
        email: String,
        /// The rejected source.
        source_name: String,
    },

    /// Malformed input.
    #[error("Validation error on field '{field}': {message}")]
    Validation {
        /// The offending field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// The write lost a race against another writer of the same department.
    #[error(
        "Concurrent modification of department {department}: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        /// Department being written.
        department: String,
        /// Version the writer started from.
        expected: u64,
        /// Version found in the store.
        actual: u64,
    },

    /// Durable storage failed after all retries.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GovernanceError {
    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an unresolved id.
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::RecordNotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether the failure is caused by caller input rather than the engine.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound { .. }
                | Self::ConflictNotFound(_)
                | Self::InvalidSource { .. }
                | Self::Validation { .. }
        )
    }
}

impl From<CoreError> for GovernanceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { resource, id } => Self::Validation {
                field: resource,
                message: id.map_or_else(|| "not found".to_string(), |i| format!("{i} not found")),
            },
            CoreError::ValidationError { field, message } => Self::Validation { field, message },
        }
    }
}

impl From<validator::ValidationErrors> for GovernanceError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation {
            field: "request".to_string(),
            message: err.to_string(),
        }
    }
}

/// Convenience Result type for the permission engine.
pub type Result<T> = std::result::Result<T, GovernanceError>;
