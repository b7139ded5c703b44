//! Module access levels.
//!
//! Levels are totally ordered: `none < access < admin`. Raw strings coming
//! from callers are parsed strictly; an unrecognized value is a
//! [`CoreError::ValidationError`], never a silent downgrade to `none`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Access tier granted for one functional module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ModuleAccessLevel {
    /// No access to the module.
    #[default]
    None,
    /// Regular use of the module.
    Access,
    /// Full administrative control of the module.
    Admin,
}

impl ModuleAccessLevel {
    /// All levels in ascending order.
    pub const ALL: [ModuleAccessLevel; 3] = [Self::None, Self::Access, Self::Admin];

    /// Parses a level, reporting failures against `field`.
    pub fn parse_field(value: &str, field: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "access" => Ok(Self::Access),
            "admin" => Ok(Self::Admin),
            _ => Err(CoreError::ValidationError {
                field: field.to_string(),
                message: format!("'{value}' is not one of none, access, admin"),
            }),
        }
    }

    /// Whether the level grants any access at all.
    #[must_use]
    pub fn grants_access(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for ModuleAccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Access => write!(f, "access"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for ModuleAccessLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_field(s, "access_level")
    }
}

/// A requested permission value: an explicit level, or a request to drop the
/// explicit entry and fall back to the level above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDirective {
    /// Write an explicit level.
    Set(ModuleAccessLevel),
    /// Remove the explicit entry so resolution inherits.
    Inherit,
}

impl AccessDirective {
    /// Parses a directive (`none|access|admin|inherit`), reporting failures
    /// against `field`.
    pub fn parse_field(value: &str, field: &str) -> Result<Self, CoreError> {
        if value.trim().eq_ignore_ascii_case("inherit") {
            return Ok(Self::Inherit);
        }
        ModuleAccessLevel::parse_field(value, field).map(Self::Set)
    }

    /// The explicit level, if any.
    #[must_use]
    pub fn level(self) -> Option<ModuleAccessLevel> {
        match self {
            Self::Set(level) => Some(level),
            Self::Inherit => None,
        }
    }
}

impl From<ModuleAccessLevel> for AccessDirective {
    fn from(level: ModuleAccessLevel) -> Self {
        Self::Set(level)
    }
}

impl fmt::Display for AccessDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(level) => level.fmt(f),
            Self::Inherit => write!(f, "inherit"),
        }
    }
}

impl FromStr for AccessDirective {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_field(s, "access_level")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(ModuleAccessLevel::None < ModuleAccessLevel::Access);
        assert!(ModuleAccessLevel::Access < ModuleAccessLevel::Admin);
        assert_eq!(
            ModuleAccessLevel::ALL.iter().max(),
            Some(&ModuleAccessLevel::Admin)
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "ADMIN".parse::<ModuleAccessLevel>().unwrap(),
            ModuleAccessLevel::Admin
        );
        assert_eq!(
            " access ".parse::<ModuleAccessLevel>().unwrap(),
            ModuleAccessLevel::Access
        );
    }

    #[test]
    fn test_unknown_level_is_validation_error() {
        let err = ModuleAccessLevel::parse_field("write", "moduleAccess.hr").unwrap_err();
        match err {
            CoreError::ValidationError { field, message } => {
                assert_eq!(field, "moduleAccess.hr");
                assert!(message.contains("write"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validation_message_keeps_submitted_value() {
        let err = AccessDirective::parse_field(" Write ", "userOverrides.bob").unwrap_err();
        match err {
            CoreError::ValidationError { message, .. } => {
                assert!(message.contains("' Write '"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_inherit_is_only_a_directive() {
        assert_eq!(
            "inherit".parse::<AccessDirective>().unwrap(),
            AccessDirective::Inherit
        );
        assert!("inherit".parse::<ModuleAccessLevel>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&ModuleAccessLevel::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
        let level: ModuleAccessLevel = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(level, ModuleAccessLevel::None);
    }

    #[test]
    fn test_grants_access() {
        assert!(!ModuleAccessLevel::None.grants_access());
        assert!(ModuleAccessLevel::Access.grants_access());
        assert!(ModuleAccessLevel::Admin.grants_access());
    }
}
