//! Effective access resolution.
//!
//! Walks user override → sub-group → department → `none`. Every call
//! recomputes from the current records, so there is nothing to invalidate.

use std::collections::BTreeMap;
use std::sync::Arc;

use orgperm_core::{ModuleAccessLevel, ModuleKey, UserId};

use crate::error::{GovernanceError, Result};
use crate::modules::ModuleCatalogue;
use crate::services::hierarchy::{HierarchyService, Placement};
use crate::services::permission_store::{PermissionRecord, PermissionStore};

/// Resolves a user's effective access from one department record.
///
/// `record` is `None` when the department has no permission record yet.
#[must_use]
pub fn resolve(
    record: Option<&PermissionRecord>,
    placement: &Placement,
    user: &UserId,
    module: &ModuleKey,
) -> ModuleAccessLevel {
    let Some(record) = record else {
        return ModuleAccessLevel::None;
    };

    if let Some(level) = record
        .user_overrides_for(placement, user)
        .and_then(|overrides| overrides.get(module))
    {
        return *level;
    }

    if let Some(level) = placement
        .sub_group
        .as_ref()
        .and_then(|sg| record.sub_groups.get(sg))
        .and_then(|sg| sg.module_access.get(module))
    {
        return *level;
    }

    record
        .module_access
        .get(module)
        .copied()
        .unwrap_or_default()
}

/// Answers authorization checks against the current hierarchy and records.
pub struct CascadeResolver {
    hierarchy: Arc<HierarchyService>,
    store: Arc<dyn PermissionStore>,
    catalogue: Arc<ModuleCatalogue>,
}

impl CascadeResolver {
    pub fn new(
        hierarchy: Arc<HierarchyService>,
        store: Arc<dyn PermissionStore>,
        catalogue: Arc<ModuleCatalogue>,
    ) -> Self {
        Self {
            hierarchy,
            store,
            catalogue,
        }
    }

    async fn locate(&self, user: &UserId) -> Result<(Placement, Option<PermissionRecord>)> {
        let snapshot = self.hierarchy.snapshot().await;
        let placement = snapshot
            .placement(user)
            .cloned()
            .ok_or_else(|| GovernanceError::not_found("User", user))?;
        let record = self.store.get(&placement.department).await?;
        Ok((placement, record))
    }

    /// Effective access level of `user` for `module`.
    pub async fn effective_access(
        &self,
        user: &UserId,
        module: &ModuleKey,
    ) -> Result<ModuleAccessLevel> {
        self.catalogue.ensure_known(module, "moduleKey")?;
        let (placement, record) = self.locate(user).await?;
        Ok(resolve(record.as_ref(), &placement, user, module))
    }

    /// Whether the effective level is anything but `none`.
    pub async fn has_access(&self, user: &UserId, module: &ModuleKey) -> Result<bool> {
        Ok(self.effective_access(user, module).await?.grants_access())
    }

    /// Whether the effective level is `admin`.
    pub async fn has_admin_access(&self, user: &UserId, module: &ModuleKey) -> Result<bool> {
        Ok(self.effective_access(user, module).await? == ModuleAccessLevel::Admin)
    }

    /// Effective access for every catalogue module, from one record read.
    pub async fn effective_access_map(
        &self,
        user: &UserId,
    ) -> Result<BTreeMap<ModuleKey, ModuleAccessLevel>> {
        let (placement, record) = self.locate(user).await?;
        Ok(self
            .catalogue
            .keys()
            .map(|module| {
                (
                    module.clone(),
                    resolve(record.as_ref(), &placement, user, module),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::permission_store::{ModuleAccessMap, SubGroupPermissions};
    use orgperm_core::{DepartmentId, SubGroupId};

    fn hr() -> ModuleKey {
        ModuleKey::new("hr")
    }

    fn placement(sub_group: Option<&str>) -> Placement {
        Placement {
            department: DepartmentId::from_name("Sales"),
            sub_group: sub_group.map(SubGroupId::from_name),
        }
    }

    fn record() -> PermissionRecord {
        let mut record = PermissionRecord::new(DepartmentId::from_name("Sales"), "Sales");
        record.module_access.insert(hr(), ModuleAccessLevel::None);
        record
    }

    #[test]
    fn test_no_record_resolves_to_none() {
        let alice = UserId::from_email("alice@x.com");
        assert_eq!(
            resolve(None, &placement(None), &alice, &hr()),
            ModuleAccessLevel::None
        );
    }

    #[test]
    fn test_department_value_inherited() {
        let mut record = record();
        record.module_access.insert(hr(), ModuleAccessLevel::Access);
        let bob = UserId::from_email("bob@x.com");
        assert_eq!(
            resolve(Some(&record), &placement(Some("West")), &bob, &hr()),
            ModuleAccessLevel::Access
        );
        assert_eq!(
            resolve(Some(&record), &placement(Some("West")), &bob, &ModuleKey::new("chat")),
            ModuleAccessLevel::None
        );
    }

    #[test]
    fn test_sub_group_overrides_department() {
        let mut record = record();
        record.sub_groups.insert(
            SubGroupId::from_name("West"),
            SubGroupPermissions {
                module_access: ModuleAccessMap::from([(hr(), ModuleAccessLevel::Access)]),
                ..Default::default()
            },
        );
        let bob = UserId::from_email("bob@x.com");

        assert_eq!(
            resolve(Some(&record), &placement(Some("West")), &bob, &hr()),
            ModuleAccessLevel::Access
        );
        assert_eq!(
            resolve(Some(&record), &placement(Some("East")), &bob, &hr()),
            ModuleAccessLevel::None
        );
    }

    #[test]
    fn test_explicit_none_overrides_inheritance() {
        let mut record = record();
        record.module_access.insert(hr(), ModuleAccessLevel::Admin);
        record.sub_groups.insert(
            SubGroupId::from_name("West"),
            SubGroupPermissions {
                module_access: ModuleAccessMap::from([(hr(), ModuleAccessLevel::None)]),
                ..Default::default()
            },
        );
        let bob = UserId::from_email("bob@x.com");
        assert_eq!(
            resolve(Some(&record), &placement(Some("West")), &bob, &hr()),
            ModuleAccessLevel::None
        );
    }

    #[test]
    fn test_user_override_wins() {
        let mut record = record();
        let alice = UserId::from_email("alice@x.com");
        let west = placement(Some("West"));
        record.user_overrides_slot(&west).insert(
            alice.clone(),
            ModuleAccessMap::from([(hr(), ModuleAccessLevel::Admin)]),
        );

        assert_eq!(
            resolve(Some(&record), &west, &alice, &hr()),
            ModuleAccessLevel::Admin
        );
        // The override lives at the sub-group, not the department.
        assert_eq!(
            resolve(Some(&record), &placement(None), &alice, &hr()),
            ModuleAccessLevel::None
        );
    }
}
