//! Identity reconciliation and hierarchical permission resolution.
//!
//! This crate merges user records from several identity sources into one
//! catalogue, derives a department / sub-group hierarchy from their raw
//! department strings, and resolves module access through a three-level
//! override hierarchy.
//!
//! # Features
//!
//! - Identity catalogue keyed by `(source, external_id)`
//! - Duplicate-email conflict detection and administrator-driven resolution
//! - Deterministic hierarchy extraction (`Department|SubGroup`)
//! - Effective access: user override, then sub-group, then department
//! - Cascading permission writes that clear overrides beneath the write point
//! - Default permission bootstrap for newly extracted nodes
//! - Append-only audit log of every write
//! - File-backed storage with retried, atomic document writes
//!
//! # Services
//!
//! The [`services`] module provides:
//! - [`services::IdentityService`] - Catalogue writes, conflicts, source sync
//! - [`services::HierarchyService`] - Cached hierarchy snapshots
//! - [`services::CascadeResolver`] - Effective access checks
//! - [`services::CascadeWriter`] - Department, sub-group and user writes
//! - [`services::AutoInitializer`] - Default permission bootstrap
//!
//! [`PermissionEngine`] wires them over one set of stores, and
//! [`api::HierarchyApi`] exposes the request/response contracts.

pub mod api;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod modules;
pub mod services;
pub mod storage;
pub mod types;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineStores, PermissionEngine};
pub use error::{GovernanceError, Result};
pub use modules::{ModuleCatalogue, ModuleDefinition, PageDefinition};
pub use types::{AuditAction, CascadeScope, IdentitySource};

pub use services::{
    AutoInitializeResult, CascadeResult, CascadeTarget, DefaultPolicy, Department, DirectiveMap,
    EmailConflict, HierarchyAnalysis, HierarchyConfig, HierarchySnapshot, IdentityRecord,
    IdentitySourceAdapter, PermissionChange, PermissionRecord, SubGroup, SubGroupPermissions,
};
