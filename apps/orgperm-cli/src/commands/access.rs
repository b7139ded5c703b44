//! Effective access lookup

use clap::Args;

use super::{print_json, Context};
use crate::error::CliResult;

/// Arguments for the access command
#[derive(Args, Debug)]
pub struct AccessArgs {
    /// User email
    #[arg(long, short = 'u')]
    pub user: String,

    /// Module key
    #[arg(long, short = 'm')]
    pub module: String,
}

pub async fn execute(ctx: &Context, args: AccessArgs) -> CliResult<()> {
    print_json(&ctx.api.effective_access(&args.user, &args.module).await?)
}
