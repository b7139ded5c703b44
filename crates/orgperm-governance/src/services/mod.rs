//! Engine services.
//!
//! - [`identity`]: identity catalogue and duplicate-email conflicts
//! - [`hierarchy`]: department / sub-group extraction
//! - [`permission_store`]: permission records and department write locks
//! - [`resolver`]: effective access resolution
//! - [`cascade`]: cascading permission writes
//! - [`initializer`]: default permission bootstrap

pub mod cascade;
pub mod hierarchy;
pub mod identity;
pub mod initializer;
pub mod permission_store;
pub mod resolver;

pub use cascade::{CascadeResult, CascadeTarget, CascadeWriter, DirectiveMap, PermissionChange};
pub use hierarchy::{
    AnalysisInfo, Department, HierarchyAnalysis, HierarchyConfig, HierarchyExtractor,
    HierarchyService, HierarchySnapshot, ParsingStats, Placement, SubGroup, UserRef,
};
pub use identity::{
    detect_conflicts, ConflictResolution, EmailConflict, IdentityRecord, IdentityService,
    IdentitySourceAdapter, IdentityStore, InMemoryIdentityStore, SyncSummary,
};
pub use initializer::{AutoInitializeResult, AutoInitializer, DefaultPolicy};
pub use permission_store::{
    DepartmentLocks, InMemoryPermissionStore, ModuleAccessMap, PermissionRecord, PermissionStore,
    SubGroupPermissions, UserOverrides,
};
pub use resolver::{resolve, CascadeResolver};
