//! orgperm CLI - administrator command line for permission hierarchies
//!
//! Operates directly on a state directory:
//! - Import identity exports and reconcile duplicate emails
//! - Inspect the derived department / sub-group hierarchy
//! - Apply cascading permission writes and bootstrap defaults
//! - Check effective access and browse the audit log

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use orgperm_core::ActorId;
use orgperm_governance::api::HierarchyApi;
use orgperm_governance::{EngineConfig, PermissionEngine};

mod commands;
mod error;
mod logging;

use commands::Context;
use error::CliResult;

/// orgperm CLI - Department permission management
#[derive(Parser, Debug)]
#[command(name = "orgperm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// State directory (overrides ORGPERM_STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Actor recorded in audit entries (defaults to a fresh id per run)
    #[arg(long, global = true, env = "ORGPERM_ACTOR")]
    actor: Option<ActorId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import identity records from a JSON export
    Import(commands::identity::ImportArgs),

    /// List duplicate-email conflicts
    Conflicts,

    /// Resolve a duplicate-email conflict
    Resolve(commands::identity::ResolveArgs),

    /// Show the derived department hierarchy
    Analyze,

    /// List the module catalogue
    Modules,

    /// List stored department permission records
    Permissions,

    /// Apply a cascading permission write
    Cascade(commands::cascade::CascadeArgs),

    /// Write default permissions for new departments and sub-groups
    AutoInit,

    /// Show a user's effective access to a module
    Access(commands::access::AccessArgs),

    /// Browse the audit log
    Audit(commands::audit::AuditArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.print();
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    logging::init(&config);

    let engine = Arc::new(PermissionEngine::open(&config).await?);
    let ctx = Context {
        api: HierarchyApi::new(engine),
        actor_id: cli.actor.unwrap_or_default(),
    };

    match cli.command {
        Commands::Import(args) => commands::identity::import(&ctx, args).await,
        Commands::Conflicts => commands::identity::conflicts(&ctx).await,
        Commands::Resolve(args) => commands::identity::resolve(&ctx, args).await,
        Commands::Analyze => commands::hierarchy::analyze(&ctx).await,
        Commands::Modules => commands::hierarchy::modules(&ctx),
        Commands::Permissions => commands::hierarchy::permissions(&ctx).await,
        Commands::Cascade(args) => commands::cascade::execute(&ctx, args).await,
        Commands::AutoInit => commands::hierarchy::auto_init(&ctx).await,
        Commands::Access(args) => commands::access::execute(&ctx, args).await,
        Commands::Audit(args) => commands::audit::execute(&ctx, args).await,
    }
}
