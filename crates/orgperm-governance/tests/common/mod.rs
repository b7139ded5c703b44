//! Common test utilities for orgperm-governance integration tests.
//!
//! Every test builds its own engine over in-memory stores, so tests are
//! isolated and need no filesystem.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use orgperm_core::{
    AccessDirective, ActorId, AuditEntryId, DepartmentId, ModuleAccessLevel, ModuleKey, UserId,
};
use orgperm_governance::api::HierarchyApi;
use orgperm_governance::audit::{
    AuditEntry, AuditEntryInput, AuditFilter, AuditStore, InMemoryAuditStore,
};
use orgperm_governance::services::{
    DirectiveMap, InMemoryIdentityStore, InMemoryPermissionStore, PermissionStore,
};
use orgperm_governance::{
    DefaultPolicy, EngineStores, GovernanceError, HierarchyConfig, IdentityRecord,
    IdentitySource, ModuleCatalogue, PermissionEngine, PermissionRecord,
};

/// Concrete in-memory stores, kept so tests can inspect them directly.
#[derive(Clone)]
pub struct TestStores {
    pub identities: Arc<InMemoryIdentityStore>,
    pub permissions: Arc<InMemoryPermissionStore>,
    pub audit: Arc<InMemoryAuditStore>,
}

impl TestStores {
    pub fn new() -> Self {
        Self {
            identities: Arc::new(InMemoryIdentityStore::new()),
            permissions: Arc::new(InMemoryPermissionStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
        }
    }

    fn engine_stores(&self) -> EngineStores {
        EngineStores {
            identities: self.identities.clone(),
            permissions: self.permissions.clone(),
            audit: self.audit.clone(),
        }
    }
}

/// Test context containing stores, the engine and its API surface.
pub struct TestContext {
    pub stores: TestStores,
    pub engine: Arc<PermissionEngine>,
    pub api: HierarchyApi,
    pub actor_id: ActorId,
}

impl TestContext {
    /// A fresh engine with the built-in module catalogue.
    pub fn new() -> Self {
        init_tracing();
        let stores = TestStores::new();
        let engine = Arc::new(PermissionEngine::new(
            stores.engine_stores(),
            ModuleCatalogue::default(),
            HierarchyConfig::default(),
            DefaultPolicy::default(),
        ));
        Self {
            api: HierarchyApi::new(engine.clone()),
            stores,
            engine,
            actor_id: ActorId::new(),
        }
    }

    /// A fresh engine with `records` already in the catalogue.
    pub async fn with_records(records: Vec<IdentityRecord>) -> Self {
        let ctx = Self::new();
        for record in records {
            ctx.engine
                .upsert_identity(record)
                .await
                .expect("Failed to seed identity record");
        }
        ctx
    }

    pub async fn access(&self, email: &str, module: &str) -> ModuleAccessLevel {
        self.engine
            .effective_access(&UserId::from_email(email), &ModuleKey::new(module))
            .await
            .expect("Failed to resolve effective access")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An engine over caller-supplied permission and audit stores, seeded with
/// `records`. Identity upserts never touch either store.
pub async fn engine_over(
    identities: Arc<InMemoryIdentityStore>,
    permissions: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditStore>,
    records: Vec<IdentityRecord>,
) -> PermissionEngine {
    init_tracing();
    let engine = PermissionEngine::new(
        EngineStores {
            identities,
            permissions,
            audit,
        },
        ModuleCatalogue::default(),
        HierarchyConfig::default(),
        DefaultPolicy::default(),
    );
    for record in records {
        engine
            .upsert_identity(record)
            .await
            .expect("Failed to seed identity record");
    }
    engine
}

/// Audit store that rejects every append.
#[derive(Debug, Default)]
pub struct UnavailableAuditStore;

#[async_trait::async_trait]
impl AuditStore for UnavailableAuditStore {
    async fn append(&self, _input: AuditEntryInput) -> orgperm_governance::Result<AuditEntry> {
        Err(GovernanceError::Storage("audit log unavailable".to_string()))
    }

    async fn query(&self, _filter: AuditFilter) -> orgperm_governance::Result<Vec<AuditEntry>> {
        Ok(Vec::new())
    }

    async fn get(&self, _id: AuditEntryId) -> orgperm_governance::Result<Option<AuditEntry>> {
        Ok(None)
    }
}

/// In-memory permission store whose saves fail for one department.
#[derive(Debug)]
pub struct FailingDepartmentStore {
    pub inner: InMemoryPermissionStore,
    pub failing: DepartmentId,
}

impl FailingDepartmentStore {
    pub fn new(failing: &str) -> Self {
        Self {
            inner: InMemoryPermissionStore::new(),
            failing: DepartmentId::from_name(failing),
        }
    }
}

#[async_trait::async_trait]
impl PermissionStore for FailingDepartmentStore {
    async fn get(&self, department: &DepartmentId) -> orgperm_governance::Result<Option<PermissionRecord>> {
        self.inner.get(department).await
    }

    async fn list(&self) -> orgperm_governance::Result<Vec<PermissionRecord>> {
        self.inner.list().await
    }

    async fn save(
        &self,
        record: PermissionRecord,
        expected_version: u64,
    ) -> orgperm_governance::Result<PermissionRecord> {
        if record.department_id == self.failing {
            return Err(GovernanceError::Storage(format!(
                "write permission record: {} is read-only",
                record.department_id
            )));
        }
        self.inner.save(record, expected_version).await
    }

    async fn remove(
        &self,
        department: &DepartmentId,
        expected_version: u64,
    ) -> orgperm_governance::Result<()> {
        self.inner.remove(department, expected_version).await
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("orgperm=debug")
        .with_test_writer()
        .try_init();
}

/// An active record with an external id derived from source and email.
pub fn record(source: IdentitySource, email: &str, department: &str) -> IdentityRecord {
    IdentityRecord::new(source, format!("{source}:{email}"), email, email).with_department(department)
}

/// Builds a directive map from `(module, directive)` pairs.
pub fn directives(pairs: &[(&str, &str)]) -> DirectiveMap {
    pairs
        .iter()
        .map(|(module, value)| {
            (
                ModuleKey::new(*module),
                value.parse::<AccessDirective>().expect("bad directive in test"),
            )
        })
        .collect()
}

/// Builds a raw string map as submitted in request bodies.
pub fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// The standard Sales / Finance fixture.
///
/// - Sales|West: alice, bob
/// - Sales|East: carol
/// - Sales (direct): dave
/// - Finance: erin
pub fn sales_fixture() -> Vec<IdentityRecord> {
    vec![
        record(IdentitySource::Directory, "alice@x.com", "Sales|West"),
        record(IdentitySource::Directory, "bob@x.com", "Sales|West"),
        record(IdentitySource::Ldap, "carol@x.com", "Sales|East"),
        record(IdentitySource::Manual, "dave@x.com", "Sales"),
        record(IdentitySource::Upload, "erin@x.com", "Finance"),
    ]
}
