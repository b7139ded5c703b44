//! Error Types
//!
//! This module provides the error type shared by every orgperm crate.
//!
//! # Example
//!
//! ```
//! use orgperm_core::{CoreError, Result};
//!
//! fn find_department(id: &str) -> Result<String> {
//!     if id.is_empty() {
//!         return Err(CoreError::NotFound {
//!             resource: "Department".to_string(),
//!             id: None,
//!         });
//!     }
//!     Ok(format!("Department {}", id))
//! }
//! ```

use serde::Serialize;
use thiserror::Error;

/// Standardized error type for orgperm.
///
/// # Variants
///
/// - `NotFound` - Resource not found
/// - `ValidationError` - Input validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreError {
    /// Requested resource was not found.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        /// The type of resource that was not found (e.g., "Department", "User")
        resource: String,
        /// Optional identifier of the resource
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Input validation failure.
    #[error("Validation error on field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },
}

/// Type alias for Results using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
