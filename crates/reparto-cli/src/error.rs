use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] reparto_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Operation ID cannot be empty")]
    EmptyOperationId,
    #[error("Operation not found for id/prefix: {0}")]
    OperationNotFound(String),
    #[error("{0}")]
    AmbiguousOperationId(String),
    #[error("Payload must be a JSON object: {0}")]
    InvalidJsonObject(String),
    #[error("Unknown resource kind: {0}. Expected deliveries, pickups, members, or products")]
    UnknownResource(String),
    #[error("Unknown resolution strategy: {0}. Expected local, remote, or merge")]
    UnknownStrategy(String),
    #[error("Update operations require --base with the record snapshot taken when the edit began")]
    MissingBaseSnapshot,
    #[error(
        "Remote API is not configured. Set REPARTO_API_BASE_URL (and optionally REPARTO_API_TOKEN), or pass --api-url."
    )]
    RemoteNotConfigured,
}
