//! Cascading permission writes.
//!
//! A write at department scope replaces the department's module access and
//! clears every sub-group and user override beneath it. A sub-group write
//! replaces that sub-group's access and clears only its user overrides. A
//! user write touches only that user's override entry.
//!
//! Every call appends exactly one audit entry, successful or not. The success
//! entry is appended while the department lock is still held; if it cannot be
//! written the save is rolled back, so a failed call leaves the stored record
//! as it was. A user write that changes nothing saves nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgperm_core::{AccessDirective, ActorId, DepartmentId, ModuleKey, SubGroupId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{AuditEntryInput, AuditStore};
use crate::error::{GovernanceError, Result};
use crate::modules::ModuleCatalogue;
use crate::services::hierarchy::{HierarchyService, HierarchySnapshot, Placement};
use crate::services::permission_store::{
    restore, DepartmentLocks, ModuleAccessMap, PermissionRecord, PermissionStore, UserOverrides,
};
use crate::types::{AuditAction, CascadeScope};

/// Module key to directive, as submitted by an administrator.
pub type DirectiveMap = BTreeMap<ModuleKey, AccessDirective>;

/// Where a permission change applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeTarget {
    Department(DepartmentId),
    SubGroup {
        department: DepartmentId,
        sub_group: SubGroupId,
    },
    /// The user's override entry at their current placement.
    User(UserId),
}

impl CascadeTarget {
    #[must_use]
    pub fn scope(&self) -> CascadeScope {
        match self {
            Self::Department(_) => CascadeScope::Department,
            Self::SubGroup { .. } => CascadeScope::Subgroup,
            Self::User(_) => CascadeScope::User,
        }
    }

    /// Identifier recorded in the audit log.
    #[must_use]
    pub fn audit_id(&self) -> String {
        match self {
            Self::Department(d) => d.to_string(),
            Self::SubGroup {
                department,
                sub_group,
            } => format!("{department}/{sub_group}"),
            Self::User(u) => u.to_string(),
        }
    }
}

/// A permission write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionChange {
    pub target: CascadeTarget,
    /// For department and sub-group targets this replaces the whole map;
    /// `inherit` entries are dropped. For a user target, `inherit` removes
    /// that override key.
    pub module_access: DirectiveMap,
}

/// What a write overwrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CascadeResult {
    pub mode: CascadeScope,
    /// Sub-group entries whose access or overrides were replaced.
    pub affected_sub_group_count: usize,
    /// User override entries removed or rewritten.
    pub affected_user_override_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Who and what an audit entry is recorded against.
struct AuditTarget {
    actor_id: ActorId,
    scope: CascadeScope,
    target_id: String,
}

/// Counts gathered while mutating a record.
struct Applied {
    affected_sub_groups: usize,
    affected_user_overrides: usize,
    affected_users: usize,
    department: DepartmentId,
}

/// A mutated record waiting to be committed.
struct Pending {
    previous: Option<PermissionRecord>,
    record: PermissionRecord,
    /// False when the mutation was a no-op; nothing is saved then.
    changed: bool,
    applied: Applied,
}

/// Applies permission changes under per-department locks.
pub struct CascadeWriter {
    hierarchy: Arc<HierarchyService>,
    store: Arc<dyn PermissionStore>,
    audit_store: Arc<dyn AuditStore>,
    catalogue: Arc<ModuleCatalogue>,
    locks: Arc<DepartmentLocks>,
}

impl CascadeWriter {
    pub fn new(
        hierarchy: Arc<HierarchyService>,
        store: Arc<dyn PermissionStore>,
        audit_store: Arc<dyn AuditStore>,
        catalogue: Arc<ModuleCatalogue>,
        locks: Arc<DepartmentLocks>,
    ) -> Self {
        Self {
            hierarchy,
            store,
            audit_store,
            catalogue,
            locks,
        }
    }

    /// Applies one change and records it in the audit log.
    pub async fn apply_permission_change(
        &self,
        change: PermissionChange,
        actor_id: ActorId,
    ) -> Result<CascadeResult> {
        let scope = change.target.scope();
        let audit = AuditTarget {
            actor_id,
            scope,
            target_id: change.target.audit_id(),
        };

        let outcome = self.apply(change, &audit).await;
        if let Err(e) = &outcome {
            self.record_failure(&audit, e).await;
        }
        outcome
    }

    /// Applies overrides for several users of one department in a single
    /// write. Every user and module is validated before anything changes.
    pub async fn apply_user_overrides(
        &self,
        department: DepartmentId,
        overrides: BTreeMap<UserId, DirectiveMap>,
        actor_id: ActorId,
    ) -> Result<CascadeResult> {
        let audit = AuditTarget {
            actor_id,
            scope: CascadeScope::User,
            target_id: department.to_string(),
        };

        let outcome = self.apply_batch(department, overrides, &audit).await;
        if let Err(e) = &outcome {
            self.record_failure(&audit, e).await;
        }
        outcome
    }

    /// Saves `pending` and appends its audit entry. Must be called with the
    /// department lock held; a failed append rolls the save back.
    async fn commit(&self, audit: &AuditTarget, pending: Pending) -> Result<CascadeResult> {
        let Pending {
            previous,
            record,
            changed,
            applied,
        } = pending;

        let saved = if changed {
            let expected = previous.as_ref().map_or(0, |r| r.version);
            Some(self.store.save(record, expected).await?)
        } else {
            None
        };
        let updated_at = saved
            .as_ref()
            .or(previous.as_ref())
            .map_or_else(Utc::now, |r| r.updated_at);

        let result = CascadeResult {
            mode: audit.scope,
            affected_sub_group_count: applied.affected_sub_groups,
            affected_user_override_count: applied.affected_user_overrides,
            updated_at,
        };

        let appended = self
            .audit_store
            .append(AuditEntryInput {
                actor_id: audit.actor_id,
                action: AuditAction::for_scope(audit.scope),
                target_scope: audit.scope,
                target_id: audit.target_id.clone(),
                affected_user_count: applied.affected_users,
                success: true,
                detail: Some(serde_json::json!({
                    "department": applied.department,
                    "affectedSubGroupCount": result.affected_sub_group_count,
                    "affectedUserOverrideCount": result.affected_user_override_count,
                })),
            })
            .await;
        if let Err(e) = appended {
            if let Some(saved) = &saved {
                restore(self.store.as_ref(), previous, saved).await;
            }
            return Err(e);
        }

        info!(
            target: "orgperm",
            actor = %audit.actor_id,
            scope = %audit.scope,
            target = %audit.target_id,
            department = %applied.department,
            affected_sub_groups = result.affected_sub_group_count,
            affected_user_overrides = result.affected_user_override_count,
            saved = changed,
            "Permission change applied"
        );
        Ok(result)
    }

    async fn record_failure(&self, audit: &AuditTarget, err: &GovernanceError) {
        warn!(
            target: "orgperm",
            actor = %audit.actor_id,
            scope = %audit.scope,
            target = %audit.target_id,
            error = %err,
            "Permission change rejected"
        );

        let appended = self
            .audit_store
            .append(AuditEntryInput {
                actor_id: audit.actor_id,
                action: AuditAction::for_scope(audit.scope),
                target_scope: audit.scope,
                target_id: audit.target_id.clone(),
                affected_user_count: 0,
                success: false,
                detail: Some(serde_json::json!({ "error": err.to_string() })),
            })
            .await;
        if let Err(e) = appended {
            error!(
                target: "orgperm",
                target = %audit.target_id,
                error = %e,
                "Failed to audit rejected permission change"
            );
        }
    }

    fn validate_modules<'a>(&self, keys: impl Iterator<Item = &'a ModuleKey>) -> Result<()> {
        for key in keys {
            self.catalogue
                .ensure_known(key, &format!("moduleAccess.{key}"))?;
        }
        Ok(())
    }

    /// The stored record and a working copy to mutate. The copy is a fresh
    /// record when the department has none yet.
    async fn load(
        &self,
        snapshot: &HierarchySnapshot,
        department: &DepartmentId,
    ) -> Result<(Option<PermissionRecord>, PermissionRecord)> {
        let previous = self.store.get(department).await?;
        let mut record = previous
            .clone()
            .unwrap_or_else(|| PermissionRecord::new(department.clone(), department.as_str()));
        if let Some(node) = snapshot.department(department) {
            record.department_name.clone_from(&node.name);
        }
        Ok((previous, record))
    }

    async fn apply(&self, change: PermissionChange, audit: &AuditTarget) -> Result<CascadeResult> {
        self.validate_modules(change.module_access.keys())?;
        let snapshot = self.hierarchy.snapshot().await;

        match change.target {
            CascadeTarget::Department(department) => {
                let node = snapshot
                    .department(&department)
                    .ok_or_else(|| GovernanceError::not_found("Department", &department))?;
                let affected_users = node.user_count;

                let _guard = self.locks.lock(&department).await;
                let (previous, mut record) = self.load(&snapshot, &department).await?;

                let affected_sub_groups =
                    record.sub_groups.values().filter(|s| !s.is_empty()).count();
                let affected_user_overrides = record.user_override_count();

                record.module_access = replacement(change.module_access);
                record.initialized = true;
                record.user_overrides.clear();
                for sub_group in record.sub_groups.values_mut() {
                    sub_group.module_access.clear();
                    sub_group.user_overrides.clear();
                    sub_group.initialized = true;
                }

                self.commit(
                    audit,
                    Pending {
                        previous,
                        record,
                        changed: true,
                        applied: Applied {
                            affected_sub_groups,
                            affected_user_overrides,
                            affected_users,
                            department,
                        },
                    },
                )
                .await
            }
            CascadeTarget::SubGroup {
                department,
                sub_group,
            } => {
                let node = snapshot
                    .sub_group(&department, &sub_group)
                    .ok_or_else(|| {
                        GovernanceError::not_found("SubGroup", format!("{department}/{sub_group}"))
                    })?;
                let affected_users = node.users.len();

                let _guard = self.locks.lock(&department).await;
                let (previous, mut record) = self.load(&snapshot, &department).await?;

                let entry = record.sub_groups.entry(sub_group).or_default();
                let affected_user_overrides = entry.user_overrides.len();
                entry.module_access = replacement(change.module_access);
                entry.user_overrides.clear();
                entry.initialized = true;

                self.commit(
                    audit,
                    Pending {
                        previous,
                        record,
                        changed: true,
                        applied: Applied {
                            affected_sub_groups: 1,
                            affected_user_overrides,
                            affected_users,
                            department,
                        },
                    },
                )
                .await
            }
            CascadeTarget::User(user) => {
                let placement = snapshot
                    .placement(&user)
                    .cloned()
                    .ok_or_else(|| GovernanceError::not_found("User", &user))?;
                let department = placement.department.clone();

                let _guard = self.locks.lock(&department).await;
                let (previous, mut record) = self.load(&snapshot, &department).await?;

                // Unchanged records are never saved, so a no-op leaves no
                // empty department or sub-group entry behind.
                let touched = apply_overrides(
                    record.user_overrides_slot(&placement),
                    user,
                    change.module_access,
                );

                self.commit(
                    audit,
                    Pending {
                        previous,
                        record,
                        changed: touched,
                        applied: Applied {
                            affected_sub_groups: 0,
                            affected_user_overrides: usize::from(touched),
                            affected_users: usize::from(touched),
                            department,
                        },
                    },
                )
                .await
            }
        }
    }

    async fn apply_batch(
        &self,
        department: DepartmentId,
        overrides: BTreeMap<UserId, DirectiveMap>,
        audit: &AuditTarget,
    ) -> Result<CascadeResult> {
        if overrides.is_empty() {
            return Err(GovernanceError::validation(
                "userOverrides",
                "at least one user override is required",
            ));
        }
        self.validate_modules(overrides.values().flat_map(BTreeMap::keys))?;

        let snapshot = self.hierarchy.snapshot().await;
        if snapshot.department(&department).is_none() {
            return Err(GovernanceError::not_found("Department", &department));
        }

        let placements: Vec<Placement> = overrides
            .keys()
            .map(|user| match snapshot.placement(user) {
                Some(p) if p.department == department => Ok(p.clone()),
                _ => Err(GovernanceError::not_found(
                    "User",
                    format!("{user} in department {department}"),
                )),
            })
            .collect::<Result<_>>()?;

        let _guard = self.locks.lock(&department).await;
        let (previous, mut record) = self.load(&snapshot, &department).await?;

        let mut touched = 0;
        for ((user, directives), placement) in overrides.into_iter().zip(placements) {
            if apply_overrides(record.user_overrides_slot(&placement), user, directives) {
                touched += 1;
            }
        }

        self.commit(
            audit,
            Pending {
                previous,
                record,
                changed: touched > 0,
                applied: Applied {
                    affected_sub_groups: 0,
                    affected_user_overrides: touched,
                    affected_users: touched,
                    department,
                },
            },
        )
        .await
    }
}

/// A replacement map: explicit levels kept, `inherit` dropped.
fn replacement(directives: DirectiveMap) -> ModuleAccessMap {
    directives
        .into_iter()
        .filter_map(|(key, directive)| directive.level().map(|level| (key, level)))
        .collect()
}

/// Merges `directives` into `user`'s override entry. Returns whether anything
/// changed. An entry left empty is removed.
fn apply_overrides(slot: &mut UserOverrides, user: UserId, directives: DirectiveMap) -> bool {
    let entry = slot.entry(user.clone()).or_default();
    let before = entry.clone();

    for (key, directive) in directives {
        match directive.level() {
            Some(level) => {
                entry.insert(key, level);
            }
            None => {
                entry.remove(&key);
            }
        }
    }

    let changed = *entry != before;
    if entry.is_empty() {
        slot.remove(&user);
    }
    changed
}
