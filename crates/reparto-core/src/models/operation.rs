//! Queued operation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::resource::{Priority, ResourceKind};

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of remote mutation; immutable after enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Lowercase label stored in the queue table
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown operation type: {other}"
            ))),
        }
    }
}

/// Queue state of an operation.
///
/// Transitions are owned by the sync engine; consumers observe statuses
/// through snapshots and move them only via engine commands (resolve,
/// retry, cancel, re-auth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Due for the next sync run
    Pending,
    /// A remote apply is in flight
    Syncing,
    /// Permanent failure or exhausted retry budget; awaits user action
    Failed,
    /// Conflicting concurrent edits; awaits user resolution
    NeedsReview,
    /// Session expired; paused until re-authentication
    PendingAuth,
}

impl OperationStatus {
    /// Lowercase label stored in the queue table
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::NeedsReview => "needs_review",
            Self::PendingAuth => "pending_auth",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "needs_review" => Ok(Self::NeedsReview),
            "pending_auth" => Ok(Self::PendingAuth),
            other => Err(Error::InvalidInput(format!(
                "unknown operation status: {other}"
            ))),
        }
    }
}

/// Acting user and data-isolation scope, captured at enqueue time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Acting user id
    pub owner_id: String,
    /// Cooperative scope the data belongs to
    pub scope_id: String,
}

impl SessionContext {
    /// Create a session context
    pub fn new(owner_id: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            scope_id: scope_id.into(),
        }
    }
}

/// A local mutation intent before it is queued or applied directly.
///
/// Constructors enforce the base-snapshot rules: a create carries no
/// snapshot (there is no prior remote state to diff against), updates
/// capture the record as it was when the edit began.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWrite {
    pub op_type: OperationType,
    pub resource: ResourceKind,
    pub record_id: String,
    pub payload: Map<String, Value>,
    pub base_snapshot: Option<Map<String, Value>>,
}

impl LocalWrite {
    /// A create with a client-generated record id
    pub fn create(
        resource: ResourceKind,
        record_id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            op_type: OperationType::Create,
            resource,
            record_id: record_id.into(),
            payload,
            base_snapshot: None,
        }
    }

    /// An update with the record fields captured when the edit began
    pub fn update(
        resource: ResourceKind,
        record_id: impl Into<String>,
        payload: Map<String, Value>,
        base_snapshot: Map<String, Value>,
    ) -> Self {
        Self {
            op_type: OperationType::Update,
            resource,
            record_id: record_id.into(),
            payload,
            base_snapshot: Some(base_snapshot),
        }
    }

    /// A delete; the snapshot, when available, lets the engine notice
    /// concurrent edits to the record being removed
    pub fn delete(
        resource: ResourceKind,
        record_id: impl Into<String>,
        base_snapshot: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            op_type: OperationType::Delete,
            resource,
            record_id: record_id.into(),
            payload: Map::new(),
            base_snapshot,
        }
    }
}

/// A durably persisted, not-yet-confirmed local mutation intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier, assigned at enqueue time
    pub id: OperationId,
    /// Kind of remote mutation; immutable after enqueue
    pub op_type: OperationType,
    /// Target collection
    pub resource: ResourceKind,
    /// Affected record; client-generated for creates
    pub record_id: String,
    /// Mutation data to apply
    pub payload: Map<String, Value>,
    /// Record fields captured when the local edit began; `None` for
    /// creates. Used only for conflict detection, never written back.
    pub base_snapshot: Option<Map<String, Value>>,
    /// Queue state
    pub status: OperationStatus,
    /// Cumulative failed attempts, kept for audit
    pub retry_count: u32,
    /// `retry_count` at the start of the current attempt window; a manual
    /// retry advances it so the budget check starts fresh
    pub retry_window_base: u32,
    /// Last failure description; present only in failed/needs_review
    pub error: Option<String>,
    /// Ordering hint derived from the collection at enqueue time
    pub priority: Priority,
    /// Acting user, captured at enqueue time
    pub owner_id: String,
    /// Data-isolation scope, captured at enqueue time
    pub scope_id: String,
    /// Enqueue timestamp (Unix ms); secondary sort key
    pub created_at: i64,
    /// Earliest due time (Unix ms); backoff defers by moving it forward
    pub next_attempt_at: i64,
}

impl QueuedOperation {
    /// Materialize a write intent as a pending queue entry
    #[must_use]
    pub fn new(write: LocalWrite, session: &SessionContext) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: OperationId::new(),
            op_type: write.op_type,
            priority: write.resource.priority(),
            resource: write.resource,
            record_id: write.record_id,
            payload: write.payload,
            base_snapshot: write.base_snapshot,
            status: OperationStatus::Pending,
            retry_count: 0,
            retry_window_base: 0,
            error: None,
            owner_id: session.owner_id.clone(),
            scope_id: session.scope_id.clone(),
            created_at: now,
            next_attempt_at: now,
        }
    }

    /// Failed attempts inside the current retry window
    #[must_use]
    pub const fn attempts_in_window(&self) -> u32 {
        self.retry_count.saturating_sub(self.retry_window_base)
    }

    /// Whether the operation is due for processing at `now_ms`
    #[must_use]
    pub const fn is_due(&self, now_ms: i64) -> bool {
        matches!(self.status, OperationStatus::Pending) && self.next_attempt_at <= now_ms
    }
}

/// Partial update applied to a stored operation.
///
/// `None` leaves a column untouched; the nested `Option` on `error` and
/// `base_snapshot` distinguishes "clear" from "keep".
#[derive(Debug, Clone, Default)]
pub struct OperationPatch {
    pub status: Option<OperationStatus>,
    pub retry_count: Option<u32>,
    pub retry_window_base: Option<u32>,
    pub error: Option<Option<String>>,
    pub payload: Option<Map<String, Value>>,
    pub base_snapshot: Option<Option<Map<String, Value>>>,
    pub next_attempt_at: Option<i64>,
}

impl OperationPatch {
    /// A patch that only moves the status
    #[must_use]
    pub fn with_status(status: OperationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply this patch to an in-memory operation
    pub fn apply_to(&self, op: &mut QueuedOperation) {
        if let Some(status) = self.status {
            op.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            op.retry_count = retry_count;
        }
        if let Some(retry_window_base) = self.retry_window_base {
            op.retry_window_base = retry_window_base;
        }
        if let Some(error) = &self.error {
            op.error.clone_from(error);
        }
        if let Some(payload) = &self.payload {
            op.payload.clone_from(payload);
        }
        if let Some(base_snapshot) = &self.base_snapshot {
            op.base_snapshot.clone_from(base_snapshot);
        }
        if let Some(next_attempt_at) = self.next_attempt_at {
            op.next_attempt_at = next_attempt_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn session() -> SessionContext {
        SessionContext::new("user-1", "coop-1")
    }

    fn payload() -> Map<String, Value> {
        json!({"weight": 10}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_operation_id_unique() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_create_has_no_base_snapshot() {
        let write = LocalWrite::create(ResourceKind::Delivery, "d1", payload());
        let op = QueuedOperation::new(write, &session());
        assert_eq!(op.op_type, OperationType::Create);
        assert!(op.base_snapshot.is_none());
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.priority, Priority::High);
        assert_eq!(op.owner_id, "user-1");
        assert_eq!(op.scope_id, "coop-1");
    }

    #[test]
    fn test_update_captures_base_snapshot() {
        let base = json!({"weight": 8}).as_object().cloned().unwrap();
        let write = LocalWrite::update(ResourceKind::Delivery, "d1", payload(), base.clone());
        let op = QueuedOperation::new(write, &session());
        assert_eq!(op.base_snapshot, Some(base));
    }

    #[test]
    fn test_attempts_in_window() {
        let write = LocalWrite::create(ResourceKind::Product, "p1", {
            json!({"name": "Flour", "unit": "kg"}).as_object().cloned().unwrap()
        });
        let mut op = QueuedOperation::new(write, &session());
        op.retry_count = 7;
        op.retry_window_base = 5;
        assert_eq!(op.attempts_in_window(), 2);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::Syncing,
            OperationStatus::Failed,
            OperationStatus::NeedsReview,
            OperationStatus::PendingAuth,
        ] {
            let parsed: OperationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_patch_clears_error() {
        let write = LocalWrite::create(ResourceKind::Member, "m1", {
            json!({"name": "Ana"}).as_object().cloned().unwrap()
        });
        let mut op = QueuedOperation::new(write, &session());
        op.status = OperationStatus::Failed;
        op.error = Some("timeout".to_string());

        let patch = OperationPatch {
            status: Some(OperationStatus::Pending),
            error: Some(None),
            ..OperationPatch::default()
        };
        patch.apply_to(&mut op);

        assert_eq!(op.status, OperationStatus::Pending);
        assert!(op.error.is_none());
    }
}
