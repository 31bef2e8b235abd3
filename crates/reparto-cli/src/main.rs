//! Reparto CLI - drive the offline operation queue from the terminal
//!
//! Enqueue writes while offline, drain the queue, and work through
//! conflicts without leaving the shell.

mod commands;
mod error;

use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};

use crate::commands::common::{open_engine, resolve_db_path};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "reparto")]
#[command(about = "Offline-first operation queue for cooperative deliveries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local queue database
    #[arg(long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,

    /// Remote API base URL (overrides REPARTO_API_BASE_URL)
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    /// Remote API bearer token (overrides REPARTO_API_TOKEN)
    #[arg(long, value_name = "TOKEN", global = true)]
    api_token: Option<String>,

    /// Acting user id (overrides REPARTO_OWNER_ID)
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Cooperative scope id (overrides REPARTO_SCOPE_ID)
    #[arg(long, global = true)]
    coop: Option<String>,

    /// Treat the device as offline; writes are queued, never applied
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a write (applied directly when online, queued otherwise)
    Add {
        /// Target collection (deliveries, pickups, members, products)
        resource: String,
        /// Record id; client-generated for creates
        record_id: String,
        /// Operation kind
        #[arg(long, value_enum, default_value_t = OpKind::Create)]
        op: OpKind,
        /// Mutation payload as a JSON object
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Record snapshot taken when the edit began (updates/deletes)
        #[arg(long, value_name = "JSON")]
        base: Option<String>,
    },
    /// List the operation queue
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain the pending queue once
    Sync,
    /// Show engine status counters
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflicted operation
    Resolve {
        /// Operation ID or unique ID prefix
        id: String,
        /// Strategy: local, remote, or merge
        strategy: String,
        /// Resolved values per conflicting field (merge strategy)
        #[arg(long, value_name = "JSON")]
        merged: Option<String>,
    },
    /// Requeue a failed operation with a fresh attempt window
    Retry {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Remove an operation from the queue
    Cancel {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Release auth-blocked operations after logging back in
    AuthRefreshed,
    /// Sync periodically and stream engine events
    Watch {
        /// Seconds between sync runs
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reparto=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path.clone());
    let engine = open_engine(
        db_path,
        cli.api_url.clone(),
        cli.api_token.clone(),
        cli.owner.clone(),
        cli.coop.clone(),
        cli.offline,
    )
    .await?;

    match &cli.command {
        Commands::Add {
            resource,
            record_id,
            op,
            payload,
            base,
        } => {
            commands::add::run_add(
                &engine,
                resource,
                record_id,
                *op,
                payload.as_deref(),
                base.as_deref(),
            )
            .await?;
        }
        Commands::List { json } => commands::queue::run_list(&engine, *json).await?,
        Commands::Sync => commands::sync_cmd::run_sync(&engine).await?,
        Commands::Status { json } => commands::sync_cmd::run_status(&engine, *json).await?,
        Commands::Resolve {
            id,
            strategy,
            merged,
        } => {
            commands::resolve::run_resolve(&engine, id, strategy, merged.as_deref()).await?;
        }
        Commands::Retry { id } => commands::queue::run_retry(&engine, id).await?,
        Commands::Cancel { id } => commands::queue::run_cancel(&engine, id).await?,
        Commands::AuthRefreshed => commands::resolve::run_auth_refreshed(&engine).await?,
        Commands::Watch { interval } => commands::sync_cmd::run_watch(&engine, *interval).await?,
        Commands::Completions { .. } => unreachable!("handled before engine setup"),
    }

    Ok(())
}

fn run_completions(
    shell: CompletionShell,
    output: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    let mut buffer: Vec<u8> = Vec::new();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut command, &name, &mut buffer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut command, &name, &mut buffer),
        CompletionShell::Fish => generate(shells::Fish, &mut command, &name, &mut buffer),
    }

    match output {
        Some(path) => std::fs::write(path, &buffer)?,
        None => std::io::stdout().write_all(&buffer)?,
    }
    Ok(())
}
