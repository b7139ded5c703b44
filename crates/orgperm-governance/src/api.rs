//! Transport-agnostic request/response contracts.
//!
//! [`HierarchyApi`] exposes the engine the way an HTTP layer or the CLI calls
//! it: camelCase bodies carrying raw strings, validated and parsed into the
//! engine's typed operations.
//!
//! | Operation | Method |
//! |-----------|--------|
//! | `GET hierarchy.analyze` | [`HierarchyApi::analyze`] |
//! | `GET hierarchy.modules` | [`HierarchyApi::modules`] |
//! | `GET hierarchy.permissions.all` | [`HierarchyApi::permissions_all`] |
//! | `PUT hierarchy.departments.{id}.permissions.cascade` | [`HierarchyApi::cascade`] |
//! | `POST permissions.autoInitialize` | [`HierarchyApi::auto_initialize`] |
//! | `GET conflicts` | [`HierarchyApi::conflicts`] |
//! | `POST conflicts.resolve` | [`HierarchyApi::resolve_conflict`] |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use orgperm_core::{
    AccessDirective, ActorId, DepartmentId, ModuleAccessLevel, ModuleKey, SubGroupId, UserId,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::engine::PermissionEngine;
use crate::error::{GovernanceError, Result};
use crate::modules::ModuleDefinition;
use crate::services::{
    AutoInitializeResult, CascadeResult, CascadeTarget, DirectiveMap, EmailConflict,
    HierarchyAnalysis, IdentityRecord, PermissionChange, PermissionRecord,
};
use crate::types::{CascadeScope, IdentitySource};

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Body of `PUT hierarchy.departments.{id}.permissions.cascade`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CascadeRequest {
    /// `department`, `subgroup` or `user`.
    #[validate(custom(function = "validate_scope"))]
    pub scope: String,

    /// Department-level replacement map (module key to level).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_access: Option<BTreeMap<String, String>>,

    /// Target sub-group for `subgroup` scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 255, message = "subGroupId must be 1-255 characters"))]
    pub sub_group_id: Option<String>,

    /// Sub-group replacement map for `subgroup` scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_group_permissions: Option<BTreeMap<String, String>>,

    /// Per-user override directives for `user` scope (`inherit` removes a key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_overrides: Option<BTreeMap<String, BTreeMap<String, String>>>,
}

fn validate_scope(scope: &str) -> std::result::Result<(), validator::ValidationError> {
    if scope.parse::<CascadeScope>().is_ok() {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("invalid_scope");
        err.message = Some("Scope must be 'department', 'subgroup' or 'user'".into());
        Err(err)
    }
}

/// Body of `POST conflicts.resolve`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "keepSource is required"))]
    pub keep_source: String,

    /// Sources the caller expects to be deleted; checked against the conflict
    /// when non-empty.
    #[serde(default)]
    pub delete_from_sources: Vec<String>,
}

/// Response of `POST conflicts.resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictResponse {
    pub success: bool,
    pub email: String,
    pub kept_source: IdentitySource,
    pub removed_sources: Vec<IdentitySource>,
    pub removed_records: usize,
}

/// One entry of `GET conflicts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ConflictView {
    pub email: String,
    pub sources: BTreeSet<IdentitySource>,
    pub records: Vec<IdentityRecord>,
    /// Highest-priority source; never applied automatically.
    pub suggested_source: Option<IdentitySource>,
}

impl From<EmailConflict> for ConflictView {
    fn from(conflict: EmailConflict) -> Self {
        Self {
            suggested_source: conflict.suggested_source(),
            email: conflict.email,
            sources: conflict.sources,
            records: conflict.records,
        }
    }
}

/// Effective access of one user for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct EffectiveAccessResponse {
    pub user_id: String,
    pub module_key: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub level: ModuleAccessLevel,
    pub has_access: bool,
    pub has_admin_access: bool,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_module_key(raw: &str, field: &str) -> Result<ModuleKey> {
    raw.parse::<ModuleKey>()
        .map_err(|e| GovernanceError::validation(field, e.to_string()))
}

fn parse_directives(raw: &BTreeMap<String, String>, field: &str) -> Result<DirectiveMap> {
    raw.iter()
        .map(|(key, value)| {
            let key_field = format!("{field}.{key}");
            let module = parse_module_key(key, &key_field)?;
            let directive = AccessDirective::parse_field(value, &key_field)?;
            Ok((module, directive))
        })
        .collect()
}

fn parse_user(raw: &str, field: &str) -> Result<UserId> {
    raw.parse::<UserId>()
        .map_err(|e| GovernanceError::validation(field, e.to_string()))
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// Request/response surface over a [`PermissionEngine`].
#[derive(Clone)]
pub struct HierarchyApi {
    engine: Arc<PermissionEngine>,
}

impl HierarchyApi {
    pub fn new(engine: Arc<PermissionEngine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<PermissionEngine> {
        &self.engine
    }

    pub async fn analyze(&self) -> HierarchyAnalysis {
        self.engine.hierarchy().await.analysis()
    }

    #[must_use]
    pub fn modules(&self) -> Vec<ModuleDefinition> {
        self.engine.catalogue().modules().to_vec()
    }

    pub async fn permissions_all(&self) -> Result<Vec<PermissionRecord>> {
        self.engine.permissions_all().await
    }

    /// Applies a cascade write under `department_id`.
    pub async fn cascade(
        &self,
        department_id: &str,
        request: CascadeRequest,
        actor_id: ActorId,
    ) -> Result<CascadeResult> {
        request.validate()?;
        let scope: CascadeScope = request.scope.parse()?;
        let department = DepartmentId::from_name(department_id);

        match scope {
            CascadeScope::Department => {
                let raw = request.module_access.as_ref().ok_or_else(|| {
                    GovernanceError::validation("moduleAccess", "required for department scope")
                })?;
                let change = PermissionChange {
                    target: CascadeTarget::Department(department),
                    module_access: parse_directives(raw, "moduleAccess")?,
                };
                self.engine.apply_permission_change(change, actor_id).await
            }
            CascadeScope::Subgroup => {
                let sub_group = request.sub_group_id.as_deref().ok_or_else(|| {
                    GovernanceError::validation("subGroupId", "required for subgroup scope")
                })?;
                let (raw, field) = match (&request.sub_group_permissions, &request.module_access) {
                    (Some(raw), _) => (raw, "subGroupPermissions"),
                    (None, Some(raw)) => (raw, "moduleAccess"),
                    (None, None) => {
                        return Err(GovernanceError::validation(
                            "subGroupPermissions",
                            "required for subgroup scope",
                        ))
                    }
                };
                let change = PermissionChange {
                    target: CascadeTarget::SubGroup {
                        department,
                        sub_group: SubGroupId::from_name(sub_group),
                    },
                    module_access: parse_directives(raw, field)?,
                };
                self.engine.apply_permission_change(change, actor_id).await
            }
            CascadeScope::User => {
                let raw = request
                    .user_overrides
                    .as_ref()
                    .filter(|o| !o.is_empty())
                    .ok_or_else(|| {
                        GovernanceError::validation("userOverrides", "required for user scope")
                    })?;
                let overrides = raw
                    .iter()
                    .map(|(user, directives)| {
                        let field = format!("userOverrides.{user}");
                        Ok((parse_user(user, &field)?, parse_directives(directives, &field)?))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                self.engine
                    .apply_user_overrides(department, overrides, actor_id)
                    .await
            }
        }
    }

    pub async fn auto_initialize(&self, actor_id: ActorId) -> Result<AutoInitializeResult> {
        self.engine.auto_initialize(actor_id).await
    }

    pub async fn conflicts(&self) -> Result<Vec<ConflictView>> {
        Ok(self
            .engine
            .find_conflicts()
            .await?
            .into_iter()
            .map(ConflictView::from)
            .collect())
    }

    /// Resolves a conflict, keeping only `keepSource`'s records.
    pub async fn resolve_conflict(
        &self,
        request: ResolveConflictRequest,
        actor_id: ActorId,
    ) -> Result<ResolveConflictResponse> {
        request.validate()?;
        let keep_source: IdentitySource = request.keep_source.parse()?;
        let delete_from = request
            .delete_from_sources
            .iter()
            .map(|s| s.parse::<IdentitySource>())
            .collect::<Result<BTreeSet<_>>>()?;

        if delete_from.contains(&keep_source) {
            return Err(GovernanceError::validation(
                "deleteFromSources",
                "must not contain keepSource",
            ));
        }
        if !delete_from.is_empty() {
            if let Some(conflict) = self.engine.identity().find_conflict(&request.email).await? {
                if let Some(stray) = delete_from.difference(&conflict.sources).next() {
                    return Err(GovernanceError::validation(
                        "deleteFromSources",
                        format!("'{stray}' is not part of the conflict"),
                    ));
                }
            }
        }

        let resolution = self
            .engine
            .resolve_conflict(&request.email, keep_source, actor_id)
            .await?;

        let removed_sources: BTreeSet<_> = resolution.removed.iter().map(|r| r.source).collect();
        Ok(ResolveConflictResponse {
            success: true,
            email: resolution.email,
            kept_source: resolution.kept_source,
            removed_sources: removed_sources.into_iter().collect(),
            removed_records: resolution.removed.len(),
        })
    }

    pub async fn effective_access(&self, user: &str, module: &str) -> Result<EffectiveAccessResponse> {
        let user_id = parse_user(user, "userId")?;
        let module_key = parse_module_key(module, "moduleKey")?;
        let level = self.engine.effective_access(&user_id, &module_key).await?;

        Ok(EffectiveAccessResponse {
            user_id: user_id.into_inner(),
            module_key: module_key.into_inner(),
            level,
            has_access: level.grants_access(),
            has_admin_access: level == ModuleAccessLevel::Admin,
        })
    }
}
