//! Default permission bootstrap.
//!
//! Writes defaults for every extracted department and sub-group that has not
//! been initialized yet. Records created only to hold user overrides still get
//! their defaults; explicit writes and earlier runs are never overwritten, so
//! running it again initializes nothing.

use std::sync::Arc;

use orgperm_core::{ActorId, ModuleAccessLevel, ModuleKey};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{AuditEntryInput, AuditStore};
use crate::error::{GovernanceError, Result};
use crate::modules::ModuleCatalogue;
use crate::services::hierarchy::{Department, HierarchyService};
use crate::services::permission_store::{
    restore, DepartmentLocks, ModuleAccessMap, PermissionRecord, PermissionStore,
    SubGroupPermissions,
};
use crate::types::{AuditAction, CascadeScope};

/// Defaults written for uninitialized nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPolicy {
    /// Modules departments get `access` to; every other catalogue module
    /// is written as `none`.
    pub baseline_modules: Vec<ModuleKey>,
    /// The one module sub-groups get `access` to.
    pub sub_group_module: ModuleKey,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            baseline_modules: vec![ModuleKey::new("dashboard"), ModuleKey::new("tickets")],
            sub_group_module: ModuleKey::new("documents"),
        }
    }
}

impl DefaultPolicy {
    /// Department defaults over `catalogue`.
    #[must_use]
    pub fn department_defaults(&self, catalogue: &ModuleCatalogue) -> ModuleAccessMap {
        let mut defaults: ModuleAccessMap = catalogue
            .keys()
            .map(|key| {
                let level = if self.baseline_modules.contains(key) {
                    ModuleAccessLevel::Access
                } else {
                    ModuleAccessLevel::None
                };
                (key.clone(), level)
            })
            .collect();

        if catalogue.modules().is_empty() {
            defaults.extend(
                self.baseline_modules
                    .iter()
                    .map(|key| (key.clone(), ModuleAccessLevel::Access)),
            );
        }
        defaults
    }

    /// Sub-group defaults over `catalogue`.
    #[must_use]
    pub fn sub_group_defaults(&self, catalogue: &ModuleCatalogue) -> SubGroupPermissions {
        let mut permissions = SubGroupPermissions::default();
        if catalogue.modules().is_empty() || catalogue.contains(&self.sub_group_module) {
            permissions
                .module_access
                .insert(self.sub_group_module.clone(), ModuleAccessLevel::Access);
        }
        permissions
    }
}

/// Outcome of an auto-initialize run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AutoInitializeResult {
    pub initialized_departments: usize,
    pub initialized_sub_groups: usize,
    /// Module entries written across all new department and sub-group entries.
    pub total_permission_entries: usize,
}

impl AutoInitializeResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.initialized_departments == 0 && self.initialized_sub_groups == 0
    }
}

/// Bootstraps default permissions for the current hierarchy.
pub struct AutoInitializer {
    hierarchy: Arc<HierarchyService>,
    store: Arc<dyn PermissionStore>,
    audit_store: Arc<dyn AuditStore>,
    catalogue: Arc<ModuleCatalogue>,
    locks: Arc<DepartmentLocks>,
    policy: DefaultPolicy,
}

impl AutoInitializer {
    pub fn new(
        hierarchy: Arc<HierarchyService>,
        store: Arc<dyn PermissionStore>,
        audit_store: Arc<dyn AuditStore>,
        catalogue: Arc<ModuleCatalogue>,
        locks: Arc<DepartmentLocks>,
        policy: DefaultPolicy,
    ) -> Self {
        Self {
            hierarchy,
            store,
            audit_store,
            catalogue,
            locks,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &DefaultPolicy {
        &self.policy
    }

    /// Writes defaults for every department and sub-group still owed them.
    ///
    /// Department locks are taken in id order and held until the run is
    /// audited. If a save or the audit append fails, every department saved
    /// by this run is rolled back before the error is returned.
    pub async fn auto_initialize(&self, actor_id: ActorId) -> Result<AutoInitializeResult> {
        let snapshot = self.hierarchy.snapshot().await;
        let department_defaults = self.policy.department_defaults(&self.catalogue);
        let sub_group_defaults = self.policy.sub_group_defaults(&self.catalogue);

        let mut guards = Vec::with_capacity(snapshot.departments().len());
        let mut committed = Vec::new();
        let mut result = AutoInitializeResult::default();
        let mut affected_users = 0;

        for department in snapshot.departments() {
            guards.push(self.locks.lock(&department.id).await);

            let initialized = self
                .initialize_department(department, &department_defaults, &sub_group_defaults)
                .await;
            match initialized {
                Ok(Some(init)) => {
                    result.initialized_departments += usize::from(init.department);
                    result.initialized_sub_groups += init.sub_groups;
                    result.total_permission_entries += init.entries;
                    affected_users += init.users;
                    committed.push((init.previous, init.saved));
                }
                Ok(None) => {}
                Err(e) => {
                    self.roll_back(committed).await;
                    self.record_failure(actor_id, &e).await;
                    return Err(e);
                }
            }
        }

        if result.is_empty() {
            return Ok(result);
        }

        let appended = match serde_json::to_value(&result) {
            Ok(detail) => self
                .audit_store
                .append(AuditEntryInput {
                    actor_id,
                    action: AuditAction::AutoInitialized,
                    target_scope: CascadeScope::Department,
                    target_id: "*".to_string(),
                    affected_user_count: affected_users,
                    success: true,
                    detail: Some(detail),
                })
                .await
                .map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = appended {
            self.roll_back(committed).await;
            return Err(e);
        }

        info!(
            target: "orgperm",
            actor = %actor_id,
            departments = result.initialized_departments,
            sub_groups = result.initialized_sub_groups,
            entries = result.total_permission_entries,
            "Default permissions initialized"
        );
        Ok(result)
    }

    /// Fills in one department's defaults. Returns `None` when nothing was
    /// owed, in which case nothing is saved.
    async fn initialize_department(
        &self,
        department: &Department,
        department_defaults: &ModuleAccessMap,
        sub_group_defaults: &SubGroupPermissions,
    ) -> Result<Option<Initialized>> {
        let previous = self.store.get(&department.id).await?;
        let mut record = previous.clone().unwrap_or_else(|| {
            PermissionRecord::new(department.id.clone(), department.name.clone())
        });

        let mut entries = 0;
        let mut users = 0;

        let department_owed = record.needs_defaults();
        if department_owed {
            record.module_access = department_defaults.clone();
            record.initialized = true;
            entries += department_defaults.len();
            users += department.user_count;
        }

        let mut sub_groups = 0;
        for sub_group in &department.sub_groups {
            let entry = record.sub_groups.entry(sub_group.id.clone()).or_default();
            if !entry.needs_defaults() {
                continue;
            }
            // User overrides already in the entry are kept.
            entry.module_access = sub_group_defaults.module_access.clone();
            entry.initialized = true;
            sub_groups += 1;
            entries += entry.module_access.len();
            if !department_owed {
                users += sub_group.users.len();
            }
        }

        if !department_owed && sub_groups == 0 {
            return Ok(None);
        }

        let expected = previous.as_ref().map_or(0, |r| r.version);
        let saved = self.store.save(record, expected).await?;
        Ok(Some(Initialized {
            previous,
            saved,
            department: department_owed,
            sub_groups,
            entries,
            users,
        }))
    }

    async fn roll_back(&self, committed: Vec<(Option<PermissionRecord>, PermissionRecord)>) {
        for (previous, saved) in committed.into_iter().rev() {
            restore(self.store.as_ref(), previous, &saved).await;
        }
    }

    async fn record_failure(&self, actor_id: ActorId, err: &GovernanceError) {
        warn!(
            target: "orgperm",
            actor = %actor_id,
            error = %err,
            "Default permission initialization failed"
        );
        let appended = self
            .audit_store
            .append(AuditEntryInput {
                actor_id,
                action: AuditAction::AutoInitialized,
                target_scope: CascadeScope::Department,
                target_id: "*".to_string(),
                affected_user_count: 0,
                success: false,
                detail: Some(serde_json::json!({ "error": err.to_string() })),
            })
            .await;
        if let Err(e) = appended {
            error!(
                target: "orgperm",
                error = %e,
                "Failed to audit failed initialization"
            );
        }
    }
}

/// What one department's initialization wrote.
struct Initialized {
    previous: Option<PermissionRecord>,
    saved: PermissionRecord,
    department: bool,
    sub_groups: usize,
    entries: usize,
    users: usize,
}
