//! Engine configuration loaded from `ORGPERM_*` environment variables.

use std::path::PathBuf;

use orgperm_core::ModuleKey;

use crate::services::hierarchy::HierarchyConfig;
use crate::services::initializer::DefaultPolicy;
use crate::storage::RetryPolicy;

/// Configuration for the permission engine and its file-backed state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How raw department strings are split.
    pub hierarchy: HierarchyConfig,

    /// Optional JSON module catalogue. The built-in catalogue is used when unset.
    pub modules_file: Option<PathBuf>,

    /// Defaults written by the auto-initializer.
    pub default_policy: DefaultPolicy,

    /// Directory holding identity, permission and audit documents.
    pub state_dir: PathBuf,

    /// Retry policy for durable writes.
    pub retry: RetryPolicy,

    /// Log filter directive, used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Emit JSON log lines instead of human-readable output.
    pub log_json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hierarchy: HierarchyConfig::default(),
            modules_file: None,
            default_policy: DefaultPolicy::default(),
            state_dir: PathBuf::from("./orgperm-state"),
            retry: RetryPolicy::default(),
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let defaults = Self::default();

        let separator = match reader("ORGPERM_DEPARTMENT_SEPARATOR") {
            Ok(raw) => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(ConfigError::InvalidValue(
                            "ORGPERM_DEPARTMENT_SEPARATOR".into(),
                            format!("expected exactly one character, got '{raw}'"),
                        ))
                    }
                }
            }
            Err(_) => defaults.hierarchy.separator,
        };

        let unassigned_name = reader("ORGPERM_UNASSIGNED_DEPARTMENT")
            .unwrap_or(defaults.hierarchy.unassigned_name);
        if unassigned_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "ORGPERM_UNASSIGNED_DEPARTMENT".into(),
                "must not be blank".into(),
            ));
        }

        let modules_file = reader("ORGPERM_MODULES_FILE")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let baseline_modules = match reader("ORGPERM_BASELINE_MODULES") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ModuleKey::new)
                .collect(),
            Err(_) => defaults.default_policy.baseline_modules,
        };

        let sub_group_module = match reader("ORGPERM_SUBGROUP_DEFAULT_MODULE") {
            Ok(raw) => raw.parse::<ModuleKey>().map_err(|e| {
                ConfigError::InvalidValue("ORGPERM_SUBGROUP_DEFAULT_MODULE".into(), e.to_string())
            })?,
            Err(_) => defaults.default_policy.sub_group_module,
        };

        let state_dir = reader("ORGPERM_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let max_retries = reader("ORGPERM_STORAGE_MAX_RETRIES")
            .unwrap_or_else(|_| defaults.retry.max_retries.to_string())
            .parse::<u32>()
            .map_err(|e| {
                ConfigError::InvalidValue("ORGPERM_STORAGE_MAX_RETRIES".into(), e.to_string())
            })?;

        let initial_delay_ms = reader("ORGPERM_STORAGE_RETRY_DELAY_MS")
            .unwrap_or_else(|_| defaults.retry.initial_delay_ms.to_string())
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidValue("ORGPERM_STORAGE_RETRY_DELAY_MS".into(), e.to_string())
            })?;

        let log_filter = reader("ORGPERM_LOG").unwrap_or(defaults.log_filter);

        let log_json = reader("ORGPERM_LOG_JSON")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Self {
            hierarchy: HierarchyConfig {
                separator,
                unassigned_name,
            },
            modules_file,
            default_policy: DefaultPolicy {
                baseline_modules,
                sub_group_module,
            },
            state_dir,
            retry: RetryPolicy {
                max_retries,
                initial_delay_ms,
                ..defaults.retry
            },
            log_filter,
            log_json,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
