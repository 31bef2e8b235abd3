use std::time::Duration;

use reparto_core::sync::{SyncRun, SyncRunSummary};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_event, Engine};
use crate::error::CliError;

pub async fn run_sync(engine: &Engine) -> Result<(), CliError> {
    match engine.sync().await? {
        SyncRun::Completed(summary) => print_summary(&summary),
        SyncRun::AlreadyRunning => println!("A sync run is already in progress."),
    }
    Ok(())
}

pub async fn run_status(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let status = engine.status().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Connectivity:  {}", status.connectivity);
    println!("Syncing:       {}", if status.is_syncing { "yes" } else { "no" });
    println!("Pending:       {}", status.pending_count);
    println!("Conflicts:     {}", status.conflict_count);
    println!("Failed:        {}", status.failed_count);
    println!("Auth-blocked:  {}", status.auth_blocked_count);
    if let Some(progress) = status.progress {
        println!("Progress:      {}/{}", progress.current, progress.total);
    }
    if let Some(last) = status.last_sync {
        println!(
            "Last run:      {} synced, {} deferred, {} conflicts, {} failed",
            last.synced, last.deferred, last.conflicts, last.failed
        );
    }
    Ok(())
}

pub async fn run_watch(engine: &Engine, interval_secs: u64) -> Result<(), CliError> {
    let mut events = engine.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    println!("Watching queue (sync every {interval_secs}s); Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = engine.sync().await {
                    eprintln!("sync failed: {error}");
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(skipped)) => eprintln!("({skipped} events skipped)"),
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &SyncRunSummary) {
    if summary.total == 0 {
        println!("Nothing to sync.");
        return;
    }
    println!(
        "Sync finished: {}/{} synced, {} deferred, {} conflicts, {} failed, {} auth-blocked",
        summary.synced,
        summary.total,
        summary.deferred,
        summary.conflicts,
        summary.failed,
        summary.auth_blocked
    );
    if summary.interrupted {
        println!("Run was interrupted by a connectivity drop; remaining operations stay queued.");
    }
}
