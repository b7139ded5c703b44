//! Identity catalogue and duplicate-email conflict detection.
//!
//! Records arrive independently from up to four identity sources and are
//! stored one per `(source, external_id)`. Records from different sources
//! sharing a normalized email form an [`EmailConflict`], which an
//! administrator resolves by choosing the source to keep.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgperm_core::{normalize_email, ActorId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::audit::{AuditEntryInput, AuditStore};
use crate::error::{GovernanceError, Result};
use crate::types::{AuditAction, CascadeScope, IdentitySource};

// ============================================================================
// Domain Types
// ============================================================================

/// A user record as reported by one identity source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Source that reported the record.
    pub source: IdentitySource,
    /// Identifier of the record inside its source.
    pub external_id: String,
    /// Email as reported (compared case-insensitively).
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Raw department string, possibly `Department|SubGroup`.
    #[serde(default)]
    pub department: Option<String>,
    /// Job title.
    #[serde(default)]
    pub job_title: Option<String>,
    /// Inactive records are ignored by conflict detection and extraction.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// When the source last reported the record.
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl IdentityRecord {
    /// Creates an active record seen now.
    pub fn new(
        source: IdentitySource,
        external_id: impl Into<String>,
        email: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            email: email.into(),
            display_name: display_name.into(),
            department: None,
            job_title: None,
            is_active: true,
            last_seen: Utc::now(),
        }
    }

    /// Sets the raw department string.
    #[must_use]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Sets the job title.
    #[must_use]
    pub fn with_job_title(mut self, job_title: impl Into<String>) -> Self {
        self.job_title = Some(job_title.into());
        self
    }

    /// Marks the record inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Lower-cased, trimmed email.
    #[must_use]
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }

    /// Canonical user this record belongs to.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        UserId::from_email(&self.email)
    }
}

/// Several sources reporting the same normalized email. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct EmailConflict {
    /// Normalized email.
    pub email: String,
    /// Distinct sources reporting it.
    pub sources: BTreeSet<IdentitySource>,
    /// The conflicting records.
    pub records: Vec<IdentityRecord>,
}

impl EmailConflict {
    /// Highest-priority source among the conflict's sources.
    ///
    /// This is only a suggestion; resolution always needs an explicit choice.
    #[must_use]
    pub fn suggested_source(&self) -> Option<IdentitySource> {
        self.sources.iter().copied().max_by_key(|s| s.priority())
    }
}

/// Groups active records by normalized email and keeps groups reported by at
/// least two distinct sources.
#[must_use]
pub fn detect_conflicts(records: &[IdentityRecord]) -> Vec<EmailConflict> {
    let mut by_email: BTreeMap<String, Vec<&IdentityRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_active) {
        by_email
            .entry(record.normalized_email())
            .or_default()
            .push(record);
    }

    by_email
        .into_iter()
        .filter_map(|(email, group)| {
            let sources: BTreeSet<_> = group.iter().map(|r| r.source).collect();
            (sources.len() >= 2).then(|| EmailConflict {
                email,
                sources,
                records: group.into_iter().cloned().collect(),
            })
        })
        .collect()
}

/// Outcome of a conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    /// Normalized email.
    pub email: String,
    /// Source whose records were kept.
    pub kept_source: IdentitySource,
    /// Records deleted from the catalogue.
    pub removed: Vec<IdentityRecord>,
}

/// Outcome of pulling records from an identity source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Source synced.
    pub source: IdentitySource,
    /// Records returned by the adapter.
    pub fetched: usize,
    /// Records written to the catalogue.
    pub upserted: usize,
    /// Records rejected (blank email or foreign source).
    pub rejected: usize,
}

// ============================================================================
// Source Adapter Trait
// ============================================================================

/// A pull feed of identity records from one source.
#[async_trait::async_trait]
pub trait IdentitySourceAdapter: Send + Sync {
    /// The source every fetched record must carry.
    fn source(&self) -> IdentitySource;

    /// Fetch the current records.
    async fn fetch_records(&self) -> Result<Vec<IdentityRecord>>;
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for identity catalogue storage backends.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert or replace the record keyed by `(source, external_id)`.
    /// Returns the replaced record, if any.
    async fn upsert(&self, record: IdentityRecord) -> Result<Option<IdentityRecord>>;

    /// Get a record by its key.
    async fn get(&self, source: IdentitySource, external_id: &str)
        -> Result<Option<IdentityRecord>>;

    /// All records, ordered by `(source, external_id)`.
    async fn list_all(&self) -> Result<Vec<IdentityRecord>>;

    /// Active records only.
    async fn list_active(&self) -> Result<Vec<IdentityRecord>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect())
    }

    /// Delete every record for the normalized `email` whose source is not
    /// `keep`. Returns the deleted records.
    async fn remove_for_email_except(
        &self,
        email: &str,
        keep: IdentitySource,
    ) -> Result<Vec<IdentityRecord>>;

    /// Monotonic counter bumped on every mutation.
    fn revision(&self) -> u64;
}

type RecordKey = (IdentitySource, String);

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory identity catalogue.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    records: Arc<RwLock<BTreeMap<RecordKey, IdentityRecord>>>,
    revision: AtomicU64,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `records`.
    #[must_use]
    pub fn with_records(records: Vec<IdentityRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| ((r.source, r.external_id.clone()), r))
            .collect();
        Self {
            records: Arc::new(RwLock::new(map)),
            revision: AtomicU64::new(1),
        }
    }

    /// Number of stored records.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn upsert(&self, record: IdentityRecord) -> Result<Option<IdentityRecord>> {
        let mut records = self.records.write().await;
        let previous = records.insert((record.source, record.external_id.clone()), record);
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(previous)
    }

    async fn get(
        &self,
        source: IdentitySource,
        external_id: &str,
    ) -> Result<Option<IdentityRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(source, external_id.to_string())).cloned())
    }

    async fn list_all(&self) -> Result<Vec<IdentityRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn remove_for_email_except(
        &self,
        email: &str,
        keep: IdentitySource,
    ) -> Result<Vec<IdentityRecord>> {
        let email = normalize_email(email);
        let mut records = self.records.write().await;

        let doomed: Vec<RecordKey> = records
            .iter()
            .filter(|(_, r)| r.source != keep && r.normalized_email() == email)
            .map(|(k, _)| k.clone())
            .collect();

        let removed: Vec<_> = doomed
            .iter()
            .filter_map(|key| records.remove(key))
            .collect();
        if !removed.is_empty() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for maintaining the identity catalogue and resolving conflicts.
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    audit_store: Arc<dyn AuditStore>,
    resolve_lock: Mutex<()>,
}

impl IdentityService {
    /// Create a new identity service.
    pub fn new(store: Arc<dyn IdentityStore>, audit_store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            audit_store,
            resolve_lock: Mutex::new(()),
        }
    }

    /// The underlying catalogue.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Insert or replace a record. The only validation is a non-empty email.
    pub async fn upsert(&self, record: IdentityRecord) -> Result<()> {
        if record.normalized_email().is_empty() {
            return Err(GovernanceError::validation("email", "email must not be empty"));
        }
        self.store.upsert(record).await?;
        Ok(())
    }

    /// Pull every record from `adapter` into the catalogue.
    pub async fn sync_from(&self, adapter: &dyn IdentitySourceAdapter) -> Result<SyncSummary> {
        let source = adapter.source();
        let records = adapter.fetch_records().await?;
        let mut summary = SyncSummary {
            source,
            fetched: records.len(),
            upserted: 0,
            rejected: 0,
        };

        for record in records {
            if record.source != source {
                warn!(
                    target: "orgperm",
                    expected = %source,
                    actual = %record.source,
                    external_id = %record.external_id,
                    "Rejected record reported under a foreign source"
                );
                summary.rejected += 1;
                continue;
            }
            match self.upsert(record).await {
                Ok(()) => summary.upserted += 1,
                Err(GovernanceError::Validation { .. }) => summary.rejected += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            target: "orgperm",
            source = %source,
            fetched = summary.fetched,
            upserted = summary.upserted,
            rejected = summary.rejected,
            "Identity source synced"
        );
        Ok(summary)
    }

    /// All current duplicate-email conflicts.
    pub async fn find_conflicts(&self) -> Result<Vec<EmailConflict>> {
        let records = self.store.list_active().await?;
        Ok(detect_conflicts(&records))
    }

    /// The conflict for one email, if any.
    pub async fn find_conflict(&self, email: &str) -> Result<Option<EmailConflict>> {
        let email = normalize_email(email);
        Ok(self
            .find_conflicts()
            .await?
            .into_iter()
            .find(|c| c.email == email))
    }

    /// Delete every record for `email` whose source is not `keep_source`.
    pub async fn resolve_conflict(
        &self,
        email: &str,
        keep_source: IdentitySource,
        actor_id: ActorId,
    ) -> Result<ConflictResolution> {
        let _guard = self.resolve_lock.lock().await;
        let email = normalize_email(email);

        let resolution = match self.resolve_locked(&email, keep_source).await {
            Ok(resolution) => resolution,
            Err(e) => {
                self.record_failure(actor_id, &email, keep_source, &e).await;
                return Err(e);
            }
        };

        let appended = self
            .audit_store
            .append(AuditEntryInput {
                actor_id,
                action: AuditAction::ConflictResolved,
                target_scope: CascadeScope::User,
                target_id: email.clone(),
                affected_user_count: 1,
                success: true,
                detail: Some(serde_json::json!({
                    "keptSource": keep_source,
                    "removedRecords": resolution.removed.len(),
                    "removedSources": resolution
                        .removed
                        .iter()
                        .map(|r| r.source)
                        .collect::<BTreeSet<_>>(),
                })),
            })
            .await;
        if let Err(e) = appended {
            self.reinstate(&resolution.removed).await;
            return Err(e);
        }

        info!(
            target: "orgperm",
            actor = %actor_id,
            email = %email,
            kept_source = %keep_source,
            removed = resolution.removed.len(),
            "Identity conflict resolved"
        );
        Ok(resolution)
    }

    /// Puts back records removed by a resolution whose audit entry could not
    /// be written. Runs under the resolve lock.
    async fn reinstate(&self, removed: &[IdentityRecord]) {
        for record in removed {
            if let Err(e) = self.store.upsert(record.clone()).await {
                error!(
                    target: "orgperm",
                    email = %record.normalized_email(),
                    source = %record.source,
                    external_id = %record.external_id,
                    error = %e,
                    "Failed to reinstate identity record"
                );
            }
        }
        warn!(
            target: "orgperm",
            reinstated = removed.len(),
            "Conflict resolution rolled back"
        );
    }

    async fn record_failure(
        &self,
        actor_id: ActorId,
        email: &str,
        keep_source: IdentitySource,
        err: &GovernanceError,
    ) {
        let appended = self
            .audit_store
            .append(AuditEntryInput {
                actor_id,
                action: AuditAction::ConflictResolved,
                target_scope: CascadeScope::User,
                target_id: email.to_string(),
                affected_user_count: 0,
                success: false,
                detail: Some(serde_json::json!({
                    "keptSource": keep_source,
                    "error": err.to_string(),
                })),
            })
            .await;
        if let Err(e) = appended {
            error!(
                target: "orgperm",
                email = %email,
                error = %e,
                "Failed to audit rejected conflict resolution"
            );
        }
    }

    async fn resolve_locked(
        &self,
        email: &str,
        keep_source: IdentitySource,
    ) -> Result<ConflictResolution> {
        let conflict = self
            .find_conflict(email)
            .await?
            .ok_or_else(|| GovernanceError::ConflictNotFound(email.to_string()))?;

        if !conflict.sources.contains(&keep_source) {
            return Err(GovernanceError::InvalidSource {
                email: email.to_string(),
                source_name: keep_source.to_string(),
            });
        }

        let removed = self
            .store
            .remove_for_email_except(email, keep_source)
            .await?;

        Ok(ConflictResolution {
            email: email.to_string(),
            kept_source: keep_source,
            removed,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditFilter, InMemoryAuditStore};

    fn create_test_service() -> (
        IdentityService,
        Arc<InMemoryIdentityStore>,
        Arc<InMemoryAuditStore>,
    ) {
        let store = Arc::new(InMemoryIdentityStore::new());
        let audit_store = Arc::new(InMemoryAuditStore::new());
        let service = IdentityService::new(store.clone(), audit_store.clone());
        (service, store, audit_store)
    }

    fn alice(source: IdentitySource, department: &str) -> IdentityRecord {
        IdentityRecord::new(source, format!("{source}-alice"), "alice@x.com", "Alice")
            .with_department(department)
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_source_and_external_id() {
        let (service, store, _) = create_test_service();

        service
            .upsert(alice(IdentitySource::Directory, "Sales"))
            .await
            .unwrap();
        service
            .upsert(alice(IdentitySource::Directory, "Sales|West"))
            .await
            .unwrap();

        assert_eq!(store.count().await, 1);
        let stored = store
            .get(IdentitySource::Directory, "directory-alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.department.as_deref(), Some("Sales|West"));
    }

    #[tokio::test]
    async fn test_upsert_requires_email() {
        let (service, _, _) = create_test_service();
        let record = IdentityRecord::new(IdentitySource::Manual, "m-1", "   ", "Nobody");
        let result = service.upsert(record).await;
        assert!(matches!(result, Err(GovernanceError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_upsert_bumps_revision() {
        let (service, store, _) = create_test_service();
        let before = store.revision();
        service
            .upsert(alice(IdentitySource::Upload, "Sales"))
            .await
            .unwrap();
        assert!(store.revision() > before);
    }

    #[tokio::test]
    async fn test_conflict_detection_is_case_insensitive() {
        let (service, _, _) = create_test_service();
        service
            .upsert(alice(IdentitySource::Directory, "Sales|West"))
            .await
            .unwrap();
        service
            .upsert(
                IdentityRecord::new(IdentitySource::Upload, "u-1", " ALICE@x.com ", "Alice")
                    .with_department("Sales"),
            )
            .await
            .unwrap();

        let conflicts = service.find_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].email, "alice@x.com");
        assert_eq!(
            conflicts[0].sources,
            BTreeSet::from([IdentitySource::Directory, IdentitySource::Upload])
        );
        assert_eq!(
            conflicts[0].suggested_source(),
            Some(IdentitySource::Directory)
        );
    }

    #[tokio::test]
    async fn test_same_source_duplicates_are_not_conflicts() {
        let (service, _, _) = create_test_service();
        service
            .upsert(IdentityRecord::new(IdentitySource::Upload, "u-1", "bob@x.com", "Bob"))
            .await
            .unwrap();
        service
            .upsert(IdentityRecord::new(IdentitySource::Upload, "u-2", "bob@x.com", "Bob"))
            .await
            .unwrap();

        assert!(service.find_conflicts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_records_ignored() {
        let (service, _, _) = create_test_service();
        service
            .upsert(alice(IdentitySource::Directory, "Sales"))
            .await
            .unwrap();
        service
            .upsert(alice(IdentitySource::Ldap, "Sales").inactive())
            .await
            .unwrap();

        assert!(service.find_conflicts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_conflict_keeps_one_source() {
        let (service, store, audit_store) = create_test_service();
        let actor = ActorId::new();
        service
            .upsert(alice(IdentitySource::Directory, "Sales|West"))
            .await
            .unwrap();
        service
            .upsert(alice(IdentitySource::Upload, "Sales"))
            .await
            .unwrap();

        let resolution = service
            .resolve_conflict("Alice@X.com", IdentitySource::Directory, actor)
            .await
            .unwrap();

        assert_eq!(resolution.kept_source, IdentitySource::Directory);
        assert_eq!(resolution.removed.len(), 1);
        assert_eq!(resolution.removed[0].source, IdentitySource::Upload);

        let remaining: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.normalized_email() == "alice@x.com")
            .collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source, IdentitySource::Directory);

        let entries = audit_store.all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ConflictResolved);
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn test_resolve_unknown_conflict_fails() {
        let (service, _, audit_store) = create_test_service();
        let result = service
            .resolve_conflict("nobody@x.com", IdentitySource::Directory, ActorId::new())
            .await;
        assert!(matches!(result, Err(GovernanceError::ConflictNotFound(_))));

        let failed = audit_store
            .query(AuditFilter {
                success: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_with_foreign_source_fails_without_deleting() {
        let (service, store, _) = create_test_service();
        service
            .upsert(alice(IdentitySource::Directory, "Sales"))
            .await
            .unwrap();
        service
            .upsert(alice(IdentitySource::Upload, "Sales"))
            .await
            .unwrap();

        let result = service
            .resolve_conflict("alice@x.com", IdentitySource::Ldap, ActorId::new())
            .await;
        assert!(matches!(result, Err(GovernanceError::InvalidSource { .. })));
        assert_eq!(store.count().await, 2);
    }

    struct StaticAdapter {
        source: IdentitySource,
        records: Vec<IdentityRecord>,
    }

    #[async_trait::async_trait]
    impl IdentitySourceAdapter for StaticAdapter {
        fn source(&self) -> IdentitySource {
            self.source
        }

        async fn fetch_records(&self) -> Result<Vec<IdentityRecord>> {
            Ok(self.records.clone())
        }
    }

    #[tokio::test]
    async fn test_sync_from_adapter_rejects_foreign_and_blank_records() {
        let (service, store, _) = create_test_service();
        let adapter = StaticAdapter {
            source: IdentitySource::Ldap,
            records: vec![
                IdentityRecord::new(IdentitySource::Ldap, "l-1", "carol@x.com", "Carol"),
                IdentityRecord::new(IdentitySource::Ldap, "l-2", "", "Blank"),
                IdentityRecord::new(IdentitySource::Upload, "u-9", "dan@x.com", "Dan"),
            ],
        };

        let summary = service.sync_from(&adapter).await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.upserted, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(store.count().await, 1);
    }
}
