//! Identity import and conflict commands
//!
//! Examples:
//!   orgperm import --source ldap ./ldap-export.json
//!   orgperm conflicts
//!   orgperm resolve --email alice@x.com --keep directory --delete-from upload

use std::path::PathBuf;

use clap::Args;
use orgperm_governance::api::ResolveConflictRequest;
use orgperm_governance::storage::JsonFileAdapter;
use orgperm_governance::IdentitySource;

use super::{print_json, Context};
use crate::error::{CliError, CliResult};

/// Arguments for the import command
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Source the export came from: directory, ldap, upload or manual
    #[arg(long, short = 's')]
    pub source: String,

    /// JSON array of exported records
    pub file: PathBuf,
}

/// Arguments for the resolve command
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Conflicting email address
    #[arg(long, short = 'e')]
    pub email: String,

    /// Source whose records are kept
    #[arg(long, short = 'k')]
    pub keep: String,

    /// Sources expected to be deleted (checked against the conflict)
    #[arg(long = "delete-from", value_delimiter = ',')]
    pub delete_from: Vec<String>,
}

pub async fn import(ctx: &Context, args: ImportArgs) -> CliResult<()> {
    let source: IdentitySource = args.source.parse()?;
    if !args.file.is_file() {
        return Err(CliError::NotFound(format!(
            "export file {}",
            args.file.display()
        )));
    }

    let adapter = JsonFileAdapter::new(source, &args.file);
    let summary = ctx.api.engine().sync_from(&adapter).await?;
    print_json(&summary)
}

pub async fn conflicts(ctx: &Context) -> CliResult<()> {
    print_json(&ctx.api.conflicts().await?)
}

pub async fn resolve(ctx: &Context, args: ResolveArgs) -> CliResult<()> {
    let request = ResolveConflictRequest {
        email: args.email,
        keep_source: args.keep,
        delete_from_sources: args.delete_from,
    };
    let response = ctx.api.resolve_conflict(request, ctx.actor_id).await?;
    print_json(&response)
}
