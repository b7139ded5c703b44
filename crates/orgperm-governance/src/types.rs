//! Type definitions for the permission domain.
//!
//! Enums shared by the identity catalogue, the cascade writer and the audit log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GovernanceError;

// ============================================================================
// Identity Sources
// ============================================================================

/// One of the independent origins of user records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// Directory-sync source.
    Directory,
    /// LDAP-style directory.
    Ldap,
    /// Bulk file upload.
    Upload,
    /// Manually entered record.
    Manual,
}

impl IdentitySource {
    /// Every source, in declaration order.
    pub const ALL: [IdentitySource; 4] = [Self::Directory, Self::Ldap, Self::Upload, Self::Manual];

    /// Resolution priority used for suggestions: directory(4) > ldap(3) >
    /// manual(2) > upload(1).
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Directory => 4,
            Self::Ldap => 3,
            Self::Manual => 2,
            Self::Upload => 1,
        }
    }
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::Ldap => write!(f, "ldap"),
            Self::Upload => write!(f, "upload"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for IdentitySource {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" => Ok(Self::Directory),
            "ldap" => Ok(Self::Ldap),
            "upload" => Ok(Self::Upload),
            "manual" => Ok(Self::Manual),
            other => Err(GovernanceError::validation(
                "source",
                format!("'{other}' is not one of directory, ldap, upload, manual"),
            )),
        }
    }
}

// ============================================================================
// Cascade Scope
// ============================================================================

/// Hierarchy level a permission write (or audit entry) applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum CascadeScope {
    /// Whole department, clearing everything beneath it.
    Department,
    /// One sub-group, clearing its user overrides.
    Subgroup,
    /// A single user's overrides.
    User,
}

impl fmt::Display for CascadeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Department => write!(f, "department"),
            Self::Subgroup => write!(f, "subgroup"),
            Self::User => write!(f, "user"),
        }
    }
}

impl FromStr for CascadeScope {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "department" => Ok(Self::Department),
            "subgroup" | "sub_group" | "sub-group" => Ok(Self::Subgroup),
            "user" => Ok(Self::User),
            other => Err(GovernanceError::validation(
                "scope",
                format!("'{other}' is not one of department, subgroup, user"),
            )),
        }
    }
}

// ============================================================================
// Audit Actions
// ============================================================================

/// Kind of write recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Department-scope cascade.
    DepartmentCascade,
    /// Sub-group-scope cascade.
    SubGroupCascade,
    /// User override write.
    UserOverride,
    /// Duplicate-email conflict resolved.
    ConflictResolved,
    /// Default permissions bootstrapped.
    AutoInitialized,
}

impl AuditAction {
    /// The audit action corresponding to a cascade scope.
    #[must_use]
    pub fn for_scope(scope: CascadeScope) -> Self {
        match scope {
            CascadeScope::Department => Self::DepartmentCascade,
            CascadeScope::Subgroup => Self::SubGroupCascade,
            CascadeScope::User => Self::UserOverride,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepartmentCascade => write!(f, "department_cascade"),
            Self::SubGroupCascade => write!(f, "sub_group_cascade"),
            Self::UserOverride => write!(f, "user_override"),
            Self::ConflictResolved => write!(f, "conflict_resolved"),
            Self::AutoInitialized => write!(f, "auto_initialized"),
        }
    }
}
