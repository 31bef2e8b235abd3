//! Remote store abstraction.
//!
//! The backing service is opaque to the engine: four primitives and a
//! structured error taxonomy are all the orchestrator relies on. The
//! production implementation is [`http::HttpRemoteStore`].

pub mod http;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::ResourceKind;

/// A record as the remote store sees it
pub type RemoteRecord = Map<String, Value>;

/// Structured remote failure, classified for the retry controller
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level failure or server hiccup; safe to retry with backoff
    #[error("transient network failure: {0}")]
    Transient(String),

    /// Session expired; operations pause until re-authentication
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Rejected by the remote schema; never auto-retried
    #[error("rejected by remote store: {0}")]
    Validation(String),

    /// The record does not exist remotely
    #[error("record not found")]
    NotFound,
}

impl RemoteError {
    /// Whether this failure says anything about transport health.
    ///
    /// Auth and validation responses prove the link works; only these
    /// count against the degraded-mode window.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The opaque remote store the queue drains into.
///
/// `create` must honor the client-generated record id idempotently:
/// re-sending a create after an interrupted run is indistinguishable
/// from the first attempt.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Create a record under a client-generated id
    async fn create(
        &self,
        resource: ResourceKind,
        record_id: &str,
        payload: &RemoteRecord,
    ) -> Result<(), RemoteError>;

    /// Apply a partial update; returns the resulting record
    async fn update(
        &self,
        resource: ResourceKind,
        record_id: &str,
        payload: &RemoteRecord,
    ) -> Result<RemoteRecord, RemoteError>;

    /// Delete a record
    async fn delete(&self, resource: ResourceKind, record_id: &str) -> Result<(), RemoteError>;

    /// Fetch the current record
    async fn fetch(&self, resource: ResourceKind, record_id: &str)
        -> Result<RemoteRecord, RemoteError>;
}
