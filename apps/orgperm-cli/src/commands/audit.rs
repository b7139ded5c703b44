//! Audit log command
//!
//! Examples:
//!   orgperm audit
//!   orgperm audit --target sales --limit 10
//!   orgperm audit --failed

use clap::Args;
use orgperm_core::ActorId;
use orgperm_governance::audit::AuditFilter;

use super::{print_json, Context};
use crate::error::CliResult;

/// Arguments for the audit command
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Only entries written by this actor
    #[arg(long, short = 'a')]
    pub actor: Option<ActorId>,

    /// Only entries for this target (department id, "dept/subgroup", user id or email)
    #[arg(long, short = 't')]
    pub target: Option<String>,

    /// Only failed writes
    #[arg(long)]
    pub failed: bool,

    /// Maximum number of entries, newest first
    #[arg(long, short = 'l', default_value = "50")]
    pub limit: usize,

    /// Offset for pagination
    #[arg(long, short = 'o', default_value = "0")]
    pub offset: usize,
}

impl AuditArgs {
    fn filter(&self) -> AuditFilter {
        AuditFilter {
            actor_id: self.actor,
            target_id: self.target.clone(),
            success: self.failed.then_some(false),
            limit: Some(self.limit),
            offset: Some(self.offset),
            ..Default::default()
        }
    }
}

pub async fn execute(ctx: &Context, args: AuditArgs) -> CliResult<()> {
    let entries = ctx.api.engine().audit_log(args.filter()).await?;
    print_json(&entries)
}
