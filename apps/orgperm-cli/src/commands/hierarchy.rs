//! Read-only hierarchy views and default bootstrapping

use super::{print_json, Context};
use crate::error::CliResult;

pub async fn analyze(ctx: &Context) -> CliResult<()> {
    print_json(&ctx.api.analyze().await)
}

pub fn modules(ctx: &Context) -> CliResult<()> {
    print_json(&ctx.api.modules())
}

pub async fn permissions(ctx: &Context) -> CliResult<()> {
    print_json(&ctx.api.permissions_all().await?)
}

pub async fn auto_init(ctx: &Context) -> CliResult<()> {
    let result = ctx.api.auto_initialize(ctx.actor_id).await?;
    if result.is_empty() {
        tracing::info!("Nothing to initialize");
    }
    print_json(&result)
}
