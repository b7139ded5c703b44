//! orgperm Core Library
//!
//! Shared types for orgperm.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (UserId, DepartmentId, SubGroupId, ModuleKey, ActorId)
//! - [`access`] - The ordered module access level and write directives
//! - [`error`] - Standardized error type (CoreError)
//!
//! # Example
//!
//! ```
//! use orgperm_core::{DepartmentId, ModuleAccessLevel, UserId};
//!
//! let dept = DepartmentId::from_name("Sales");
//! let user = UserId::from_email("Alice@X.com");
//! let level: ModuleAccessLevel = "admin".parse().unwrap();
//!
//! assert_eq!(dept.as_str(), "sales");
//! assert_eq!(user.as_str(), "alice@x.com");
//! assert!(level > ModuleAccessLevel::Access);
//! ```

pub mod access;
pub mod error;
pub mod ids;

pub use access::{AccessDirective, ModuleAccessLevel};
pub use error::{CoreError, Result};
pub use ids::{
    normalize_email, slugify, ActorId, AuditEntryId, DepartmentId, ModuleKey, ParseIdError,
    SubGroupId, UserId,
};
