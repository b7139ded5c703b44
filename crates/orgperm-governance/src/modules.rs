//! Module catalogue.
//!
//! The set of functional modules (and their pages) permissions are granted
//! for. The catalogue is configuration: it is loaded once and injected into
//! the engine, never mutated by it.

use std::path::Path;

use orgperm_core::ModuleKey;
use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, Result};

/// A page inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PageDefinition {
    /// Page key.
    pub key: String,
    /// Display name.
    pub name: String,
}

/// A functional module permissions are granted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ModuleDefinition {
    /// Module key used in permission maps.
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub key: ModuleKey,
    /// Display name.
    pub name: String,
    /// Pages belonging to the module.
    #[serde(default)]
    pub pages: Vec<PageDefinition>,
}

impl ModuleDefinition {
    fn builtin(key: &str, name: &str, pages: &[(&str, &str)]) -> Self {
        Self {
            key: ModuleKey::new(key),
            name: name.to_string(),
            pages: pages
                .iter()
                .map(|(k, n)| PageDefinition {
                    key: (*k).to_string(),
                    name: (*n).to_string(),
                })
                .collect(),
        }
    }
}

/// Read-only catalogue of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleCatalogue {
    modules: Vec<ModuleDefinition>,
}

impl Default for ModuleCatalogue {
    fn default() -> Self {
        Self {
            modules: vec![
                ModuleDefinition::builtin("dashboard", "Dashboard", &[("overview", "Overview")]),
                ModuleDefinition::builtin(
                    "tickets",
                    "Tickets",
                    &[("list", "Ticket List"), ("new", "New Ticket")],
                ),
                ModuleDefinition::builtin(
                    "documents",
                    "Documents",
                    &[("library", "Library"), ("upload", "Upload")],
                ),
                ModuleDefinition::builtin("chat", "Chat", &[("assistant", "Assistant")]),
                ModuleDefinition::builtin("converter", "File Converter", &[("convert", "Convert")]),
                ModuleDefinition::builtin("hr", "Human Resources", &[("directory", "Directory")]),
                ModuleDefinition::builtin(
                    "settings",
                    "Settings",
                    &[("permissions", "Permissions"), ("conflicts", "Identity Conflicts")],
                ),
            ],
        }
    }
}

impl ModuleCatalogue {
    /// Builds a catalogue, rejecting blank or duplicate keys.
    pub fn new(modules: Vec<ModuleDefinition>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for module in &modules {
            if module.key.as_str().trim().is_empty() {
                return Err(GovernanceError::validation("modules.key", "module key must not be empty"));
            }
            if !seen.insert(module.key.clone()) {
                return Err(GovernanceError::validation(
                    "modules.key",
                    format!("duplicate module key '{}'", module.key),
                ));
            }
        }
        Ok(Self { modules })
    }

    /// Loads a catalogue from a JSON array of module definitions.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await?;
        let modules: Vec<ModuleDefinition> = serde_json::from_slice(&raw)?;
        Self::new(modules)
    }

    /// All modules, in catalogue order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleDefinition] {
        &self.modules
    }

    /// Module keys, in catalogue order.
    pub fn keys(&self) -> impl Iterator<Item = &ModuleKey> {
        self.modules.iter().map(|m| &m.key)
    }

    /// Whether `key` names a catalogued module.
    #[must_use]
    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.modules.iter().any(|m| &m.key == key)
    }

    /// Rejects keys absent from a non-empty catalogue.
    pub fn ensure_known(&self, key: &ModuleKey, field: &str) -> Result<()> {
        if self.modules.is_empty() || self.contains(key) {
            Ok(())
        } else {
            Err(GovernanceError::validation(
                field,
                format!("unknown module '{key}'"),
            ))
        }
    }
}
