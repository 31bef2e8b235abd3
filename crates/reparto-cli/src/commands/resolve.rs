use reparto_core::sync::{ResolutionStrategy, ResolveOutcome};

use crate::commands::common::{find_operation_id, parse_json_object, Engine};
use crate::error::CliError;

pub async fn run_resolve(
    engine: &Engine,
    id_prefix: &str,
    strategy: &str,
    merged: Option<&str>,
) -> Result<(), CliError> {
    let strategy: ResolutionStrategy = strategy
        .parse()
        .map_err(|_| CliError::UnknownStrategy(strategy.to_string()))?;
    let merged = merged.map(parse_json_object).transpose()?;

    let operations = engine.list_queue().await?;
    let id = find_operation_id(&operations, id_prefix)?;

    match engine.resolve_conflict(&id, strategy, merged).await? {
        ResolveOutcome::Requeued => println!("Resolved {id}; operation requeued for sync"),
        ResolveOutcome::Discarded => println!("Resolved {id}; remote state kept"),
        ResolveOutcome::AlreadyResolved => println!("Operation {id} was already resolved"),
    }
    Ok(())
}

pub async fn run_auth_refreshed(engine: &Engine) -> Result<(), CliError> {
    let released = engine.notify_authenticated().await?;
    if released == 0 {
        println!("No operations were waiting on authentication.");
    } else {
        println!("Released {released} operation(s) back to the pending queue.");
    }
    Ok(())
}
