//! Command implementations for the orgperm CLI

pub mod access;
pub mod audit;
pub mod cascade;
pub mod hierarchy;
pub mod identity;

use orgperm_core::ActorId;
use orgperm_governance::api::HierarchyApi;
use serde::Serialize;

use crate::error::CliResult;

/// Shared state handed to every command.
pub struct Context {
    pub api: HierarchyApi,
    pub actor_id: ActorId,
}

/// Print a value to stdout as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
