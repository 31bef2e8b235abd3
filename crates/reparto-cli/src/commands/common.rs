use std::env;
use std::path::PathBuf;

use chrono::Utc;
use reparto_core::models::{OperationId, QueuedOperation, SessionContext};
use reparto_core::remote::http::HttpRemoteStore;
use reparto_core::sync::{EngineConfig, SyncEngine, SyncEvent};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

/// Engine handle used by every command
pub type Engine = SyncEngine<HttpRemoteStore>;

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub id: String,
    pub op_type: String,
    pub resource: String,
    pub record_id: String,
    pub status: String,
    pub priority: String,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: i64,
    pub relative_time: String,
}

/// Resolve the queue database path: flag, then env, then data dir
pub fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = env::var("REPARTO_DB_PATH") {
        return PathBuf::from(path);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reparto")
        .join("queue.db")
}

/// Build the engine from CLI globals and environment
pub async fn open_engine(
    db_path: PathBuf,
    api_url: Option<String>,
    api_token: Option<String>,
    owner: Option<String>,
    coop: Option<String>,
    offline: bool,
) -> Result<Engine, CliError> {
    let base_url = api_url
        .or_else(|| env::var("REPARTO_API_BASE_URL").ok())
        .ok_or(CliError::RemoteNotConfigured)?;
    let token = api_token.or_else(|| env::var("REPARTO_API_TOKEN").ok());

    let mut remote = HttpRemoteStore::new(base_url)?;
    if let Some(token) = token {
        remote = remote.with_auth_token(token);
    }

    let session = SessionContext::new(
        owner
            .or_else(|| env::var("REPARTO_OWNER_ID").ok())
            .unwrap_or_else(|| "local-user".to_string()),
        coop.or_else(|| env::var("REPARTO_SCOPE_ID").ok())
            .unwrap_or_else(|| "default".to_string()),
    );

    let engine = SyncEngine::open_path(db_path, remote, session, EngineConfig::default())?;
    if offline {
        engine.set_online(false).await?;
    }
    Ok(engine)
}

/// Parse a `--payload`/`--base`/`--merged` argument into a JSON object
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>, CliError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|error| CliError::InvalidJsonObject(error.to_string()))?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| CliError::InvalidJsonObject("expected a JSON object".to_string()))
}

/// Resolve a (possibly abbreviated) operation id against the queue
pub fn find_operation_id(
    operations: &[QueuedOperation],
    prefix: &str,
) -> Result<OperationId, CliError> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(CliError::EmptyOperationId);
    }

    let matches: Vec<&QueuedOperation> = operations
        .iter()
        .filter(|op| op.id.as_str().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(CliError::OperationNotFound(prefix.to_string())),
        [op] => Ok(op.id),
        many => Err(CliError::AmbiguousOperationId(format!(
            "ID prefix '{prefix}' matches {} operations; use more characters",
            many.len()
        ))),
    }
}

pub fn operation_to_list_item(op: &QueuedOperation) -> OperationListItem {
    OperationListItem {
        id: op.id.as_str(),
        op_type: op.op_type.to_string(),
        resource: op.resource.to_string(),
        record_id: op.record_id.clone(),
        status: op.status.to_string(),
        priority: op.priority.to_string(),
        retry_count: op.retry_count,
        error: op.error.clone(),
        created_at: op.created_at,
        relative_time: relative_time(op.created_at),
    }
}

pub fn format_operation_lines(operations: &[QueuedOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|op| {
            let short_id: String = op.id.as_str().chars().take(8).collect();
            let mut line = format!(
                "{short_id}  {:<7} {:<11} {:<12} {:<12} {}",
                op.op_type,
                op.resource,
                op.record_id,
                op.status,
                relative_time(op.created_at),
            );
            if let Some(error) = &op.error {
                line.push_str(&format!("\n          {error}"));
            }
            line
        })
        .collect()
}

pub fn format_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::ConnectivityChanged(state) => format!("connectivity: {state}"),
        SyncEvent::OperationQueued { id } => format!("queued {id}"),
        SyncEvent::SyncStarted { total } => format!("sync started ({total} due)"),
        SyncEvent::OperationSynced { id } => format!("synced {id}"),
        SyncEvent::OperationDeferred { id, retry_in } => {
            format!("deferred {id} (retry in {retry_in:?})")
        }
        SyncEvent::ConflictDetected { id, kind } => format!("conflict on {id}: {kind}"),
        SyncEvent::OperationFailed { id, error } => format!("failed {id}: {error}"),
        SyncEvent::AuthRequired { id } => format!("auth required for {id}"),
        SyncEvent::AuthReleased { released } => format!("auth refreshed; {released} released"),
        SyncEvent::OperationResolved { id, strategy } => {
            format!("resolved {id} ({strategy})")
        }
        SyncEvent::OperationCancelled { id } => format!("cancelled {id}"),
        SyncEvent::SyncFinished(summary) => format!(
            "sync finished: {} synced, {} deferred, {} conflicts, {} failed",
            summary.synced, summary.deferred, summary.conflicts, summary.failed
        ),
    }
}

/// Human-readable age of a timestamp (Unix ms)
pub fn relative_time(timestamp_ms: i64) -> String {
    let delta_ms = Utc::now().timestamp_millis().saturating_sub(timestamp_ms);
    let minutes = delta_ms / 60_000;
    let hours = minutes / 60;
    let days = hours / 24;

    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else {
        format!("{days}d ago")
    }
}
