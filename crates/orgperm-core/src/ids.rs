//! Strongly Typed Identifiers
//!
//! This module provides type-safe identifier types for orgperm.
//! Two families exist:
//!
//! - UUID-backed ids for things the engine mints itself (`ActorId`, `AuditEntryId`)
//! - deterministic string ids derived from identity data (`UserId`, `DepartmentId`,
//!   `SubGroupId`, `ModuleKey`)
//!
//! Deterministic ids are what lets a re-extracted hierarchy map back onto the
//! permission records persisted for it.
//!
//! # Example
//!
//! ```
//! use orgperm_core::{DepartmentId, UserId};
//!
//! let sales = DepartmentId::from_name("Sales & Marketing");
//! assert_eq!(sales.as_str(), "sales-marketing");
//!
//! let alice = UserId::from_email("  Alice@Example.COM ");
//! assert_eq!(alice.as_str(), "alice@example.com");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Lower-cases `name` and collapses every run of non-alphanumeric characters
/// into a single `-`. Leading and trailing separators are dropped.
///
/// Returns an empty string when `name` holds no alphanumeric characters.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Normalizes an email for use as a catalogue key (trimmed, lower-cased).
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Macro to define a strongly-typed UUID ID type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

/// Macro to define a string-backed ID type with shared accessors.
macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the id and returns the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Strongly typed identifier for the administrator (or automation)
    /// performing a write.
    ///
    /// # Example
    ///
    /// ```
    /// use orgperm_core::ActorId;
    ///
    /// let actor = ActorId::new();
    /// let parsed: ActorId = actor.to_string().parse().unwrap();
    /// assert_eq!(actor, parsed);
    /// ```
    ActorId
);

define_id!(
    /// Strongly typed identifier for audit log entries.
    AuditEntryId
);

define_key!(
    /// Canonical user identifier: the normalized email.
    ///
    /// Every identity source reporting the same normalized email refers to
    /// the same canonical user.
    UserId
);

impl UserId {
    /// Builds the canonical id from a raw email.
    #[must_use]
    pub fn from_email(email: &str) -> Self {
        Self(normalize_email(email))
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = normalize_email(s);
        if normalized.is_empty() {
            return Err(ParseIdError {
                id_type: "UserId",
                message: "email must not be empty".to_string(),
            });
        }
        Ok(Self(normalized))
    }
}

define_key!(
    /// Deterministic department identifier (slug of the department name).
    DepartmentId
);

impl DepartmentId {
    /// Derives the id from a department display name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(slugify(name))
    }
}

impl FromStr for DepartmentId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let slug = slugify(s);
        if slug.is_empty() {
            return Err(ParseIdError {
                id_type: "DepartmentId",
                message: format!("'{s}' contains no alphanumeric characters"),
            });
        }
        Ok(Self(slug))
    }
}

define_key!(
    /// Deterministic sub-group identifier, unique within its department.
    SubGroupId
);

impl SubGroupId {
    /// Derives the id from a sub-group display name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(slugify(name))
    }
}

impl FromStr for SubGroupId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let slug = slugify(s);
        if slug.is_empty() {
            return Err(ParseIdError {
                id_type: "SubGroupId",
                message: format!("'{s}' contains no alphanumeric characters"),
            });
        }
        Ok(Self(slug))
    }
}

define_key!(
    /// Key of a functional module (e.g. `tickets`, `hr`).
    ModuleKey
);

impl ModuleKey {
    /// Creates a module key from a trusted, already-trimmed value.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl FromStr for ModuleKey {
    type Err = ParseIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError {
                id_type: "ModuleKey",
                message: "module key must not be empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }
}
