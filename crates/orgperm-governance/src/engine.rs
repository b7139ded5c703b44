//! Engine facade wiring the services over one set of stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use orgperm_core::{ActorId, DepartmentId, ModuleAccessLevel, ModuleKey, UserId};
use tracing::info;

use crate::audit::{AuditEntry, AuditFilter, AuditStore, InMemoryAuditStore};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::modules::ModuleCatalogue;
use crate::services::{
    AutoInitializeResult, AutoInitializer, CascadeResolver, CascadeResult, CascadeWriter,
    ConflictResolution, DefaultPolicy, DepartmentLocks, DirectiveMap, EmailConflict,
    HierarchyConfig, HierarchyService, HierarchySnapshot, IdentityRecord, IdentityService,
    IdentitySourceAdapter, IdentityStore, InMemoryIdentityStore, InMemoryPermissionStore,
    PermissionChange, PermissionRecord, PermissionStore, SyncSummary,
};
use crate::storage::{FileAuditStore, FileIdentityStore, FilePermissionStore};
use crate::types::IdentitySource;

/// Storage backends the engine runs over.
#[derive(Clone)]
pub struct EngineStores {
    pub identities: Arc<dyn IdentityStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl EngineStores {
    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            identities: Arc::new(InMemoryIdentityStore::new()),
            permissions: Arc::new(InMemoryPermissionStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
        }
    }
}

/// The permission resolution and identity reconciliation engine.
pub struct PermissionEngine {
    identity: IdentityService,
    hierarchy: Arc<HierarchyService>,
    permissions: Arc<dyn PermissionStore>,
    audit: Arc<dyn AuditStore>,
    catalogue: Arc<ModuleCatalogue>,
    resolver: CascadeResolver,
    writer: CascadeWriter,
    initializer: AutoInitializer,
}

impl PermissionEngine {
    pub fn new(
        stores: EngineStores,
        catalogue: ModuleCatalogue,
        hierarchy: HierarchyConfig,
        policy: DefaultPolicy,
    ) -> Self {
        let catalogue = Arc::new(catalogue);
        let locks = Arc::new(DepartmentLocks::new());
        let hierarchy = Arc::new(HierarchyService::new(stores.identities.clone(), hierarchy));

        Self {
            identity: IdentityService::new(stores.identities, stores.audit.clone()),
            resolver: CascadeResolver::new(
                hierarchy.clone(),
                stores.permissions.clone(),
                catalogue.clone(),
            ),
            writer: CascadeWriter::new(
                hierarchy.clone(),
                stores.permissions.clone(),
                stores.audit.clone(),
                catalogue.clone(),
                locks.clone(),
            ),
            initializer: AutoInitializer::new(
                hierarchy.clone(),
                stores.permissions.clone(),
                stores.audit.clone(),
                catalogue.clone(),
                locks,
                policy,
            ),
            hierarchy,
            permissions: stores.permissions,
            audit: stores.audit,
            catalogue,
        }
    }

    /// An engine over fresh in-memory stores with default settings.
    #[must_use]
    pub fn in_memory(catalogue: ModuleCatalogue) -> Self {
        Self::new(
            EngineStores::in_memory(),
            catalogue,
            HierarchyConfig::default(),
            DefaultPolicy::default(),
        )
    }

    /// Opens file-backed stores under `config.state_dir`.
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let catalogue = match &config.modules_file {
            Some(path) => ModuleCatalogue::load(path).await?,
            None => ModuleCatalogue::default(),
        };

        let dir = &config.state_dir;
        tokio::fs::create_dir_all(dir).await?;
        let stores = EngineStores {
            identities: Arc::new(
                FileIdentityStore::open(dir.join("identities.json"), config.retry.clone()).await?,
            ),
            permissions: Arc::new(
                FilePermissionStore::open(dir.join("permissions"), config.retry.clone()).await?,
            ),
            audit: Arc::new(
                FileAuditStore::open(dir.join("audit.jsonl"), config.retry.clone()).await?,
            ),
        };

        info!(
            target: "orgperm",
            state_dir = %dir.display(),
            modules = catalogue.modules().len(),
            "Permission engine opened"
        );

        Ok(Self::new(
            stores,
            catalogue,
            config.hierarchy.clone(),
            config.default_policy.clone(),
        ))
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    #[must_use]
    pub fn resolver(&self) -> &CascadeResolver {
        &self.resolver
    }

    #[must_use]
    pub fn writer(&self) -> &CascadeWriter {
        &self.writer
    }

    #[must_use]
    pub fn catalogue(&self) -> &ModuleCatalogue {
        &self.catalogue
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub async fn upsert_identity(&self, record: IdentityRecord) -> Result<()> {
        self.identity.upsert(record).await
    }

    pub async fn sync_from(&self, adapter: &dyn IdentitySourceAdapter) -> Result<SyncSummary> {
        self.identity.sync_from(adapter).await
    }

    pub async fn identities(&self) -> Result<Vec<IdentityRecord>> {
        self.identity.store().list_all().await
    }

    pub async fn find_conflicts(&self) -> Result<Vec<EmailConflict>> {
        self.identity.find_conflicts().await
    }

    pub async fn resolve_conflict(
        &self,
        email: &str,
        keep_source: IdentitySource,
        actor_id: ActorId,
    ) -> Result<ConflictResolution> {
        self.identity
            .resolve_conflict(email, keep_source, actor_id)
            .await
    }

    // ------------------------------------------------------------------
    // Hierarchy and reads
    // ------------------------------------------------------------------

    /// Current hierarchy, re-extracted only when the catalogue changed.
    pub async fn hierarchy(&self) -> Arc<HierarchySnapshot> {
        self.hierarchy.snapshot().await
    }

    pub async fn permissions_all(&self) -> Result<Vec<PermissionRecord>> {
        self.permissions.list().await
    }

    pub async fn permission_record(&self, department: &DepartmentId) -> Result<Option<PermissionRecord>> {
        self.permissions.get(department).await
    }

    pub async fn effective_access(&self, user: &UserId, module: &ModuleKey) -> Result<ModuleAccessLevel> {
        self.resolver.effective_access(user, module).await
    }

    pub async fn has_access(&self, user: &UserId, module: &ModuleKey) -> Result<bool> {
        self.resolver.has_access(user, module).await
    }

    pub async fn has_admin_access(&self, user: &UserId, module: &ModuleKey) -> Result<bool> {
        self.resolver.has_admin_access(user, module).await
    }

    pub async fn effective_access_map(
        &self,
        user: &UserId,
    ) -> Result<BTreeMap<ModuleKey, ModuleAccessLevel>> {
        self.resolver.effective_access_map(user).await
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn apply_permission_change(
        &self,
        change: PermissionChange,
        actor_id: ActorId,
    ) -> Result<CascadeResult> {
        self.writer.apply_permission_change(change, actor_id).await
    }

    pub async fn apply_user_overrides(
        &self,
        department: DepartmentId,
        overrides: BTreeMap<UserId, DirectiveMap>,
        actor_id: ActorId,
    ) -> Result<CascadeResult> {
        self.writer
            .apply_user_overrides(department, overrides, actor_id)
            .await
    }

    pub async fn auto_initialize(&self, actor_id: ActorId) -> Result<AutoInitializeResult> {
        self.initializer.auto_initialize(actor_id).await
    }

    pub async fn audit_log(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        self.audit.query(filter).await
    }
}
