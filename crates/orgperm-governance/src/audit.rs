//! Audit logging for permission and identity writes.
//!
//! Every cascade write, conflict resolution and auto-initialization appends
//! exactly one [`AuditEntry`]. The log is append-only.
//!
//! # Example
//!
//! ```rust,ignore
//! use orgperm_governance::audit::{AuditEntryInput, AuditStore, InMemoryAuditStore};
//! use orgperm_governance::types::{AuditAction, CascadeScope};
//!
//! let store = InMemoryAuditStore::new();
//! let entry = store
//!     .append(AuditEntryInput {
//!         actor_id,
//!         action: AuditAction::DepartmentCascade,
//!         target_scope: CascadeScope::Department,
//!         target_id: "sales".to_string(),
//!         affected_user_count: 12,
//!         success: true,
//!         detail: None,
//!     })
//!     .await?;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgperm_core::{ActorId, AuditEntryId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;
use crate::types::{AuditAction, CascadeScope};

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique identifier for the entry.
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub id: AuditEntryId,
    /// When the write happened.
    pub timestamp: DateTime<Utc>,
    /// Who performed it.
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub actor_id: ActorId,
    /// What was done.
    pub action: AuditAction,
    /// Hierarchy level targeted.
    pub target_scope: CascadeScope,
    /// Department, sub-group (`department/sub_group`) or user id.
    pub target_id: String,
    /// Users whose effective access may have changed.
    pub affected_user_count: usize,
    /// Whether the write was applied.
    pub success: bool,
    /// Free-form detail (counts, error message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Input for appending an audit entry.
#[derive(Debug, Clone)]
pub struct AuditEntryInput {
    /// Who performed the write.
    pub actor_id: ActorId,
    /// What was done.
    pub action: AuditAction,
    /// Hierarchy level targeted.
    pub target_scope: CascadeScope,
    /// Target identifier.
    pub target_id: String,
    /// Users whose effective access may have changed.
    pub affected_user_count: usize,
    /// Whether the write was applied.
    pub success: bool,
    /// Free-form detail.
    pub detail: Option<serde_json::Value>,
}

impl AuditEntryInput {
    /// Stamps the input into a stored entry.
    #[must_use]
    pub fn into_entry(self) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(),
            timestamp: Utc::now(),
            actor_id: self.actor_id,
            action: self.action,
            target_scope: self.target_scope,
            target_id: self.target_id,
            affected_user_count: self.affected_user_count,
            success: self.success,
            detail: self.detail,
        }
    }
}

/// Filter for querying audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Entries at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Entries at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Filter by actor.
    pub actor_id: Option<ActorId>,
    /// Filter by exact target id.
    pub target_id: Option<String>,
    /// Filter by action.
    pub action: Option<AuditAction>,
    /// Filter by success flag.
    pub success: Option<bool>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: Option<usize>,
}

impl AuditFilter {
    /// Whether `entry` passes every set criterion.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.from.is_none_or(|d| entry.timestamp >= d)
            && self.to.is_none_or(|d| entry.timestamp <= d)
            && self.actor_id.is_none_or(|a| entry.actor_id == a)
            && self
                .target_id
                .as_deref()
                .is_none_or(|t| entry.target_id == t)
            && self.action.is_none_or(|a| entry.action == a)
            && self.success.is_none_or(|s| entry.success == s)
    }

    /// Filters, sorts newest first and paginates.
    #[must_use]
    pub fn apply<'a>(&self, entries: impl Iterator<Item = &'a AuditEntry>) -> Vec<AuditEntry> {
        let mut results: Vec<_> = entries.filter(|e| self.matches(e)).cloned().collect();

        // Most recent first
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        results.into_iter().skip(offset).take(limit).collect()
    }
}

/// Trait for audit storage backends.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an entry.
    async fn append(&self, input: AuditEntryInput) -> Result<AuditEntry>;

    /// Query entries, newest first.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;

    /// Get a specific entry.
    async fn get(&self, id: AuditEntryId) -> Result<Option<AuditEntry>>;
}

pub(crate) fn log_appended(entry: &AuditEntry) {
    info!(
        target: "orgperm",
        entry_id = %entry.id,
        actor_id = %entry.actor_id,
        action = %entry.action,
        target_scope = %entry.target_scope,
        target_id = %entry.target_id,
        affected_users = entry.affected_user_count,
        success = entry.success,
        "Audit entry appended"
    );
}

/// In-memory audit store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditStore {
    /// Create a new in-memory audit store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the count of entries in the store.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// All entries in append order.
    pub async fn all(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, input: AuditEntryInput) -> Result<AuditEntry> {
        let entry = input.into_entry();
        self.entries.write().await.push(entry.clone());
        log_appended(&entry);
        Ok(entry)
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(filter.apply(entries.iter()))
    }

    async fn get(&self, id: AuditEntryId) -> Result<Option<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }
}
