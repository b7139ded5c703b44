//! Cascade command
//!
//! Examples:
//!   orgperm cascade --department sales --scope department --set hr=access --set chat=none
//!   orgperm cascade --department sales --scope subgroup --sub-group west --set chat=admin
//!   orgperm cascade --department sales --scope user --user bob@x.com --set chat=inherit

use std::collections::BTreeMap;

use clap::Args;
use orgperm_governance::api::CascadeRequest;

use super::{print_json, Context};
use crate::error::{CliError, CliResult};

/// Arguments for the cascade command
#[derive(Args, Debug)]
pub struct CascadeArgs {
    /// Department id or display name
    #[arg(long, short = 'd')]
    pub department: String,

    /// Write scope: department, subgroup or user
    #[arg(long, default_value = "department")]
    pub scope: String,

    /// Target sub-group (subgroup scope)
    #[arg(long)]
    pub sub_group: Option<String>,

    /// Target user email (user scope, repeatable)
    #[arg(long, short = 'u')]
    pub user: Vec<String>,

    /// Module assignment as module=level, repeatable
    #[arg(long = "set", value_parser = parse_assignment, required = true)]
    pub assignments: Vec<(String, String)>,
}

/// Parses a `module=level` pair.
fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((module, level)) if !module.trim().is_empty() && !level.trim().is_empty() => {
            Ok((module.trim().to_string(), level.trim().to_string()))
        }
        _ => Err(format!("expected module=level, got '{raw}'")),
    }
}

impl CascadeArgs {
    fn into_request(self) -> CliResult<CascadeRequest> {
        let assignments: BTreeMap<String, String> = self.assignments.into_iter().collect();
        let mut request = CascadeRequest {
            scope: self.scope.to_ascii_lowercase(),
            ..Default::default()
        };

        match request.scope.as_str() {
            "subgroup" => {
                request.sub_group_id = self.sub_group;
                request.sub_group_permissions = Some(assignments);
            }
            "user" => {
                if self.user.is_empty() {
                    return Err(CliError::Validation(
                        "--user is required for user scope".to_string(),
                    ));
                }
                request.user_overrides = Some(
                    self.user
                        .into_iter()
                        .map(|user| (user, assignments.clone()))
                        .collect(),
                );
            }
            // Unknown scopes fall through to request validation.
            _ => request.module_access = Some(assignments),
        }
        Ok(request)
    }
}

pub async fn execute(ctx: &Context, args: CascadeArgs) -> CliResult<()> {
    let department = args.department.clone();
    let request = args.into_request()?;
    let result = ctx.api.cascade(&department, request, ctx.actor_id).await?;

    if result.affected_user_override_count > 0 {
        tracing::warn!(
            department = %department,
            overrides = result.affected_user_override_count,
            "Cascade removed user overrides"
        );
    }
    print_json(&result)
}
