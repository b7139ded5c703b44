//! Permission records and their storage.
//!
//! One [`PermissionRecord`] per department holds module access at department,
//! sub-group and user-override granularity. A missing entry at any level
//! means "inherit from the level above"; an explicit entry, even `none`,
//! overrides inheritance.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgperm_core::{DepartmentId, ModuleAccessLevel, ModuleKey, SubGroupId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, warn};

use crate::error::{GovernanceError, Result};
use crate::services::hierarchy::Placement;

/// Module key to access level.
pub type ModuleAccessMap = BTreeMap<ModuleKey, ModuleAccessLevel>;

/// Per-user override maps.
pub type UserOverrides = BTreeMap<UserId, ModuleAccessMap>;

/// Sub-group level permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SubGroupPermissions {
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub module_access: ModuleAccessMap,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub user_overrides: UserOverrides,
    /// Set once defaults or an explicit sub-group or department write landed.
    #[serde(default)]
    pub initialized: bool,
}

impl SubGroupPermissions {
    /// Whether the entry holds neither module access nor overrides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.module_access.is_empty() && self.user_overrides.is_empty()
    }

    /// Whether the auto-initializer still owes this entry its defaults.
    #[must_use]
    pub fn needs_defaults(&self) -> bool {
        !self.initialized && self.module_access.is_empty()
    }
}

/// All permissions for one department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub department_id: DepartmentId,
    pub department_name: String,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub module_access: ModuleAccessMap,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub sub_groups: BTreeMap<SubGroupId, SubGroupPermissions>,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub user_overrides: UserOverrides,
    /// Set once defaults or a department-scope write landed. Records created
    /// only to hold user overrides stay uninitialized.
    #[serde(default)]
    pub initialized: bool,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every save; 0 means never saved.
    #[serde(default)]
    pub version: u64,
}

impl PermissionRecord {
    /// An empty, unsaved record.
    #[must_use]
    pub fn new(department_id: DepartmentId, department_name: impl Into<String>) -> Self {
        Self {
            department_id,
            department_name: department_name.into(),
            module_access: ModuleAccessMap::new(),
            sub_groups: BTreeMap::new(),
            user_overrides: UserOverrides::new(),
            initialized: false,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    /// Whether the auto-initializer still owes the department its defaults.
    #[must_use]
    pub fn needs_defaults(&self) -> bool {
        !self.initialized && self.module_access.is_empty()
    }

    /// The override map holding `user`'s entries for `placement`: the
    /// sub-group's when placed in one, the department's otherwise.
    #[must_use]
    pub fn user_overrides_for(&self, placement: &Placement, user: &UserId) -> Option<&ModuleAccessMap> {
        match &placement.sub_group {
            Some(sg) => self.sub_groups.get(sg)?.user_overrides.get(user),
            None => self.user_overrides.get(user),
        }
    }

    /// Mutable override slot for `placement`, created on demand.
    pub fn user_overrides_slot(&mut self, placement: &Placement) -> &mut UserOverrides {
        match &placement.sub_group {
            Some(sg) => &mut self.sub_groups.entry(sg.clone()).or_default().user_overrides,
            None => &mut self.user_overrides,
        }
    }

    /// Total user override entries at every level.
    #[must_use]
    pub fn user_override_count(&self) -> usize {
        self.user_overrides.len()
            + self
                .sub_groups
                .values()
                .map(|s| s.user_overrides.len())
                .sum::<usize>()
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for permission record storage backends.
#[async_trait::async_trait]
pub trait PermissionStore: Send + Sync {
    /// Get the record for a department.
    async fn get(&self, department: &DepartmentId) -> Result<Option<PermissionRecord>>;

    /// All records, ordered by department id.
    async fn list(&self) -> Result<Vec<PermissionRecord>>;

    /// Compare-and-swap save.
    ///
    /// Fails with [`GovernanceError::ConcurrentModification`] unless the
    /// stored version equals `expected_version` (0 when absent). On success
    /// the returned record carries the bumped version and `updated_at`.
    async fn save(&self, record: PermissionRecord, expected_version: u64) -> Result<PermissionRecord>;

    /// Compare-and-swap delete. Removing an absent record with
    /// `expected_version == 0` is a no-op.
    async fn remove(&self, department: &DepartmentId, expected_version: u64) -> Result<()>;
}

/// Checks `expected_version` before a delete.
pub(crate) fn check_remove(
    current: Option<&PermissionRecord>,
    department: &DepartmentId,
    expected_version: u64,
) -> Result<()> {
    let actual = current.map_or(0, |r| r.version);
    if actual != expected_version {
        return Err(GovernanceError::ConcurrentModification {
            department: department.to_string(),
            expected: expected_version,
            actual,
        });
    }
    Ok(())
}

/// Puts `previous` back in place of `saved` after a commit failed downstream.
///
/// Must run while the department lock taken for the write is still held.
/// A restored record keeps its content but carries a new version.
pub(crate) async fn restore(
    store: &dyn PermissionStore,
    previous: Option<PermissionRecord>,
    saved: &PermissionRecord,
) {
    let outcome = match previous {
        Some(record) => store.save(record, saved.version).await.map(|_| ()),
        None => store.remove(&saved.department_id, saved.version).await,
    };
    match outcome {
        Ok(()) => warn!(
            target: "orgperm",
            department = %saved.department_id,
            "Permission write rolled back"
        ),
        Err(e) => error!(
            target: "orgperm",
            department = %saved.department_id,
            error = %e,
            "Failed to roll back permission write"
        ),
    }
}

/// Checks `expected_version` against the stored record and stamps the new one.
pub(crate) fn prepare_save(
    current: Option<&PermissionRecord>,
    mut record: PermissionRecord,
    expected_version: u64,
) -> Result<PermissionRecord> {
    let actual = current.map_or(0, |r| r.version);
    if actual != expected_version {
        return Err(GovernanceError::ConcurrentModification {
            department: record.department_id.to_string(),
            expected: expected_version,
            actual,
        });
    }
    record.version = actual + 1;
    record.updated_at = Utc::now();
    Ok(record)
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory permission store.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    records: Arc<RwLock<BTreeMap<DepartmentId, PermissionRecord>>>,
}

impl InMemoryPermissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `records`.
    #[must_use]
    pub fn with_records(records: Vec<PermissionRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.department_id.clone(), r))
                    .collect(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn get(&self, department: &DepartmentId) -> Result<Option<PermissionRecord>> {
        Ok(self.records.read().await.get(department).cloned())
    }

    async fn list(&self) -> Result<Vec<PermissionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save(&self, record: PermissionRecord, expected_version: u64) -> Result<PermissionRecord> {
        let mut records = self.records.write().await;
        let saved = prepare_save(records.get(&record.department_id), record, expected_version)?;
        records.insert(saved.department_id.clone(), saved.clone());
        Ok(saved)
    }

    async fn remove(&self, department: &DepartmentId, expected_version: u64) -> Result<()> {
        let mut records = self.records.write().await;
        check_remove(records.get(department), department, expected_version)?;
        records.remove(department);
        Ok(())
    }
}

// ============================================================================
// Department Locks
// ============================================================================

/// Exclusive write locks scoped to one department subtree.
///
/// Writers hold the guard for the whole read-modify-save cycle. Readers never
/// take these locks.
#[derive(Debug, Default)]
pub struct DepartmentLocks {
    locks: Mutex<HashMap<DepartmentId, Arc<Mutex<()>>>>,
}

impl DepartmentLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive write access to `department`.
    pub async fn lock(&self, department: &DepartmentId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(department.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sales() -> PermissionRecord {
        PermissionRecord::new(DepartmentId::from_name("Sales"), "Sales")
    }

    #[tokio::test]
    async fn test_save_new_record_requires_version_zero() {
        let store = InMemoryPermissionStore::new();
        let saved = store.save(sales(), 0).await.unwrap();
        assert_eq!(saved.version, 1);

        let err = store.save(sales(), 0).await.unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::ConcurrentModification { expected: 0, actual: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_stale_save_leaves_record_unchanged() {
        let store = InMemoryPermissionStore::new();
        let first = store.save(sales(), 0).await.unwrap();

        let mut winner = first.clone();
        winner
            .module_access
            .insert(ModuleKey::new("hr"), ModuleAccessLevel::Admin);
        store.save(winner, first.version).await.unwrap();

        let mut loser = first.clone();
        loser
            .module_access
            .insert(ModuleKey::new("hr"), ModuleAccessLevel::None);
        assert!(store.save(loser, first.version).await.is_err());

        let stored = store.get(&first.department_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(
            stored.module_access.get(&ModuleKey::new("hr")),
            Some(&ModuleAccessLevel::Admin)
        );
    }

    #[tokio::test]
    async fn test_remove_checks_version() {
        let store = InMemoryPermissionStore::new();
        let saved = store.save(sales(), 0).await.unwrap();

        assert!(store.remove(&saved.department_id, 0).await.is_err());
        store.remove(&saved.department_id, saved.version).await.unwrap();
        assert!(store.get(&saved.department_id).await.unwrap().is_none());
        store.remove(&saved.department_id, 0).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_puts_previous_content_back() {
        let store = InMemoryPermissionStore::new();
        let previous = store.save(sales(), 0).await.unwrap();

        let mut changed = previous.clone();
        changed
            .module_access
            .insert(ModuleKey::new("hr"), ModuleAccessLevel::Admin);
        let saved = store.save(changed, previous.version).await.unwrap();

        restore(&store, Some(previous.clone()), &saved).await;
        let stored = store.get(&previous.department_id).await.unwrap().unwrap();
        assert!(stored.module_access.is_empty());
        assert_eq!(stored.version, 3);

        restore(&store, None, &stored).await;
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_needs_defaults() {
        let mut record = sales();
        assert!(record.needs_defaults());
        record.initialized = true;
        assert!(!record.needs_defaults());

        let mut sub_group = SubGroupPermissions::default();
        sub_group.user_overrides.insert(
            UserId::from_email("alice@x.com"),
            ModuleAccessMap::from([(ModuleKey::new("hr"), ModuleAccessLevel::Admin)]),
        );
        assert!(sub_group.needs_defaults());
        sub_group
            .module_access
            .insert(ModuleKey::new("chat"), ModuleAccessLevel::None);
        assert!(!sub_group.needs_defaults());
    }

    #[test]
    fn test_user_override_lookup_follows_placement() {
        let mut record = sales();
        let alice = UserId::from_email("alice@x.com");
        let west = SubGroupId::from_name("West");
        let in_west = Placement {
            department: record.department_id.clone(),
            sub_group: Some(west.clone()),
        };
        let direct = Placement {
            department: record.department_id.clone(),
            sub_group: None,
        };

        record
            .user_overrides_slot(&in_west)
            .insert(alice.clone(), ModuleAccessMap::from([(ModuleKey::new("hr"), ModuleAccessLevel::Admin)]));

        assert!(record.user_overrides_for(&in_west, &alice).is_some());
        assert!(record.user_overrides_for(&direct, &alice).is_none());
        assert!(record.sub_groups.contains_key(&west));
        assert_eq!(record.user_override_count(), 1);
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = sales();
        record
            .module_access
            .insert(ModuleKey::new("tickets"), ModuleAccessLevel::Access);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["departmentId"], "sales");
        assert_eq!(json["moduleAccess"]["tickets"], "access");
        assert!(json["subGroups"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_department_locks_serialize_writers() {
        let locks = Arc::new(DepartmentLocks::new());
        let sales = DepartmentId::from_name("Sales");

        let guard = locks.lock(&sales).await;
        let contender = {
            let locks = locks.clone();
            let sales = sales.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&sales).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Another department is not blocked.
        let _other = locks.lock(&DepartmentId::from_name("Finance")).await;

        drop(guard);
        contender.await.unwrap();
    }
}
