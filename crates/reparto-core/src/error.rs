//! Error types for reparto-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using reparto-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reparto-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queued operation not found
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// A create for the same record is already queued
    #[error("A pending create for {resource}/{record_id} is already queued")]
    DuplicateOperation {
        /// Target collection
        resource: String,
        /// Client-generated record id
        record_id: String,
    },

    /// Merge resolution left conflicting fields unresolved
    #[error("Merge resolution is missing conflicting fields: {}", missing.join(", "))]
    IncompleteMerge {
        /// Conflicting fields absent from the merged payload
        missing: Vec<String>,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote store failure
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
