//! Hierarchy extraction.
//!
//! Parses each user's raw department string into a `Department` and an
//! optional `SubGroup`, building the tree the permission store is keyed by.
//! Ids are slugs of the names, so repeated extraction over an unchanged
//! catalogue maps back onto the same permission records.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use orgperm_core::{DepartmentId, SubGroupId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::services::identity::{IdentityRecord, IdentityStore};
use crate::types::IdentitySource;

/// How raw department strings are split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyConfig {
    /// Separates department from sub-group (`Sales|West`).
    pub separator: char,
    /// Department receiving users with no usable department.
    pub unassigned_name: String,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            separator: '|',
            unassigned_name: "Unassigned".to_string(),
        }
    }
}

// ============================================================================
// Tree Types
// ============================================================================

/// A user attached to a department or sub-group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    /// Canonical user id (normalized email).
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub user_id: UserId,
    /// Display name from the placing record.
    pub display_name: String,
    /// Source of the placing record.
    pub source: IdentitySource,
    /// Job title from the placing record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
}

/// Second-level node nested under a department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct SubGroup {
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub id: SubGroupId,
    pub display_name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub parent_department_id: DepartmentId,
    pub users: Vec<UserRef>,
}

/// Top-level organizational node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Department {
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub id: DepartmentId,
    pub name: String,
    /// Direct users plus every sub-group user.
    pub user_count: usize,
    pub sub_groups: Vec<SubGroup>,
    pub direct_users: Vec<UserRef>,
}

impl Department {
    /// Looks up a sub-group of this department.
    #[must_use]
    pub fn sub_group(&self, id: &SubGroupId) -> Option<&SubGroup> {
        self.sub_groups.iter().find(|s| &s.id == id)
    }
}

/// Where a user sits in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub department: DepartmentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_group: Option<SubGroupId>,
}

/// Counts of how raw department strings parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ParsingStats {
    pub total_records: usize,
    pub with_separator: usize,
    pub without_separator: usize,
    pub empty_department: usize,
}

/// Aggregate counters over an extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AnalysisInfo {
    pub total_users: usize,
    /// Sorted distinct raw department strings.
    pub raw_department_values: Vec<String>,
    pub parsing_stats: ParsingStats,
}

/// Response shape of `hierarchy.analyze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct HierarchyAnalysis {
    pub departments: Vec<Department>,
    /// Every sub-group across all departments.
    pub sub_groups: Vec<SubGroup>,
    pub analysis_info: AnalysisInfo,
}

/// Result of one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchySnapshot {
    departments: Vec<Department>,
    placements: BTreeMap<UserId, Placement>,
    analysis_info: AnalysisInfo,
}

impl HierarchySnapshot {
    /// Departments ordered by id.
    #[must_use]
    pub fn departments(&self) -> &[Department] {
        &self.departments
    }

    #[must_use]
    pub fn department(&self, id: &DepartmentId) -> Option<&Department> {
        self.departments.iter().find(|d| &d.id == id)
    }

    #[must_use]
    pub fn sub_group(&self, department: &DepartmentId, id: &SubGroupId) -> Option<&SubGroup> {
        self.department(department)?.sub_group(id)
    }

    /// Where `user` sits, if they are in the catalogue.
    #[must_use]
    pub fn placement(&self, user: &UserId) -> Option<&Placement> {
        self.placements.get(user)
    }

    /// Users placed anywhere under `department`.
    pub fn users_in_department<'a>(
        &'a self,
        department: &'a DepartmentId,
    ) -> impl Iterator<Item = &'a UserId> + 'a {
        self.placements
            .iter()
            .filter(move |(_, p)| &p.department == department)
            .map(|(u, _)| u)
    }

    #[must_use]
    pub fn info(&self) -> &AnalysisInfo {
        &self.analysis_info
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }

    /// The `hierarchy.analyze` view of this snapshot.
    #[must_use]
    pub fn analysis(&self) -> HierarchyAnalysis {
        HierarchyAnalysis {
            departments: self.departments.clone(),
            sub_groups: self
                .departments
                .iter()
                .flat_map(|d| d.sub_groups.iter().cloned())
                .collect(),
            analysis_info: self.analysis_info.clone(),
        }
    }
}

// ============================================================================
// Extractor
// ============================================================================

#[derive(Default)]
struct DepartmentBuilder {
    name: String,
    direct_users: Vec<UserRef>,
    sub_groups: BTreeMap<SubGroupId, (String, Vec<UserRef>)>,
}

/// Builds a [`HierarchySnapshot`] from identity records.
#[derive(Debug, Clone, Default)]
pub struct HierarchyExtractor {
    config: HierarchyConfig,
}

impl HierarchyExtractor {
    #[must_use]
    pub fn new(config: HierarchyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Extracts the tree from `records`.
    ///
    /// Inactive records are skipped. When several active records share an
    /// email, the one from the highest-priority source places the user
    /// (ties go to the most recently seen record).
    #[must_use]
    pub fn extract(&self, records: &[IdentityRecord]) -> HierarchySnapshot {
        let users = unify(records);
        let unassigned_id = DepartmentId::from_name(&self.config.unassigned_name);

        let mut stats = ParsingStats {
            total_records: users.len(),
            ..ParsingStats::default()
        };
        let mut raw_values = BTreeSet::new();
        let mut builders: BTreeMap<DepartmentId, DepartmentBuilder> = BTreeMap::new();
        let mut placements = BTreeMap::new();

        for (user_id, record) in users {
            let raw = record.department.as_deref().map(str::trim).unwrap_or("");
            if raw.is_empty() {
                stats.empty_department += 1;
            } else {
                raw_values.insert(raw.to_string());
                if raw.contains(self.config.separator) {
                    stats.with_separator += 1;
                } else {
                    stats.without_separator += 1;
                }
            }

            let (department_name, sub_group_name) = self.split(raw);
            let (department_id, department_name, sub_group_name) =
                match department_name.map(|n| (DepartmentId::from_name(n), n)) {
                    Some((id, name)) if !id.as_str().is_empty() => (id, name, sub_group_name),
                    _ => (unassigned_id.clone(), self.config.unassigned_name.as_str(), None),
                };

            let user = UserRef {
                user_id: user_id.clone(),
                display_name: record.display_name.clone(),
                source: record.source,
                job_title: record.job_title.clone(),
            };

            let builder = builders.entry(department_id.clone()).or_insert_with(|| {
                DepartmentBuilder {
                    name: department_name.to_string(),
                    ..DepartmentBuilder::default()
                }
            });

            let sub_group_id = sub_group_name
                .map(|n| (SubGroupId::from_name(n), n))
                .filter(|(id, _)| !id.as_str().is_empty());

            match sub_group_id {
                Some((id, display_name)) => {
                    builder
                        .sub_groups
                        .entry(id.clone())
                        .or_insert_with(|| (display_name.to_string(), Vec::new()))
                        .1
                        .push(user);
                    placements.insert(
                        user_id,
                        Placement {
                            department: department_id,
                            sub_group: Some(id),
                        },
                    );
                }
                None => {
                    builder.direct_users.push(user);
                    placements.insert(
                        user_id,
                        Placement {
                            department: department_id,
                            sub_group: None,
                        },
                    );
                }
            }
        }

        let departments: Vec<Department> = builders
            .into_iter()
            .map(|(id, builder)| {
                let sub_groups: Vec<SubGroup> = builder
                    .sub_groups
                    .into_iter()
                    .map(|(sg_id, (display_name, users))| SubGroup {
                        id: sg_id,
                        display_name,
                        parent_department_id: id.clone(),
                        users,
                    })
                    .collect();
                let user_count =
                    builder.direct_users.len() + sub_groups.iter().map(|s| s.users.len()).sum::<usize>();
                Department {
                    id,
                    name: builder.name,
                    user_count,
                    sub_groups,
                    direct_users: builder.direct_users,
                }
            })
            .collect();

        debug!(
            target: "orgperm",
            departments = departments.len(),
            users = placements.len(),
            with_separator = stats.with_separator,
            empty_department = stats.empty_department,
            "Hierarchy extracted"
        );

        HierarchySnapshot {
            analysis_info: AnalysisInfo {
                total_users: placements.len(),
                raw_department_values: raw_values.into_iter().collect(),
                parsing_stats: stats,
            },
            departments,
            placements,
        }
    }

    /// Splits a trimmed raw value into at most two trimmed segments.
    fn split<'a>(&self, raw: &'a str) -> (Option<&'a str>, Option<&'a str>) {
        if raw.is_empty() {
            return (None, None);
        }
        let mut parts = raw.splitn(2, self.config.separator).map(str::trim);
        let department = parts.next().filter(|s| !s.is_empty());
        let sub_group = parts.next().filter(|s| !s.is_empty());
        (department, sub_group)
    }
}

/// One record per normalized email, chosen by source priority then recency.
fn unify(records: &[IdentityRecord]) -> BTreeMap<UserId, &IdentityRecord> {
    let mut users: BTreeMap<UserId, &IdentityRecord> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_active) {
        let user_id = record.user_id();
        if user_id.as_str().is_empty() {
            continue;
        }
        users
            .entry(user_id)
            .and_modify(|current| {
                if outranks(record, current) {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    users
}

fn outranks(candidate: &IdentityRecord, current: &IdentityRecord) -> bool {
    let key = |r: &IdentityRecord| (r.source.priority(), r.last_seen);
    match key(candidate).cmp(&key(current)) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.external_id < current.external_id,
    }
}

// ============================================================================
// Service
// ============================================================================

/// Serves hierarchy snapshots, re-extracting only when the catalogue changed.
pub struct HierarchyService {
    identity_store: Arc<dyn IdentityStore>,
    extractor: HierarchyExtractor,
    cache: RwLock<Option<(u64, Arc<HierarchySnapshot>)>>,
}

impl HierarchyService {
    pub fn new(identity_store: Arc<dyn IdentityStore>, config: HierarchyConfig) -> Self {
        Self {
            identity_store,
            extractor: HierarchyExtractor::new(config),
            cache: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn extractor(&self) -> &HierarchyExtractor {
        &self.extractor
    }

    /// The snapshot for the current catalogue revision.
    ///
    /// A catalogue read failure degrades to an empty hierarchy.
    pub async fn snapshot(&self) -> Arc<HierarchySnapshot> {
        let revision = self.identity_store.revision();
        if let Some((cached_rev, snapshot)) = self.cache.read().await.as_ref() {
            if *cached_rev == revision {
                return snapshot.clone();
            }
        }

        match self.extract_current().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.cache.write().await = Some((revision, snapshot.clone()));
                snapshot
            }
            Err(e) => {
                warn!(
                    target: "orgperm",
                    error = %e,
                    "Identity catalogue unreadable, serving empty hierarchy"
                );
                Arc::new(HierarchySnapshot::default())
            }
        }
    }

    async fn extract_current(&self) -> Result<HierarchySnapshot> {
        let records = self.identity_store.list_active().await?;
        Ok(self.extractor.extract(&records))
    }
}
