//! Operation queue repository implementation

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{
    OperationId, OperationPatch, OperationStatus, OperationType, QueuedOperation,
};

/// Aggregate queue counters consumed by status snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub needs_review: usize,
    pub pending_auth: usize,
}

impl QueueCounts {
    /// Every operation still queued, regardless of state
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.syncing + self.failed + self.needs_review + self.pending_auth
    }
}

/// Trait for durable queue storage operations
pub trait QueueStore {
    /// Persist a new operation; rejects a second pending create for the
    /// same `(resource, record_id)`
    fn enqueue(&self, op: &QueuedOperation) -> Result<()>;

    /// Get an operation by ID
    fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>>;

    /// List all queued operations, ordered `(priority desc, created_at asc)`
    fn list(&self) -> Result<Vec<QueuedOperation>>;

    /// Pending operations due at `now_ms`, in the same stable order
    fn due(&self, now_ms: i64) -> Result<Vec<QueuedOperation>>;

    /// Apply a partial update and return the stored result
    fn update(&self, id: &OperationId, patch: &OperationPatch) -> Result<QueuedOperation>;

    /// Remove an operation; removing an absent id is a no-op
    fn dequeue(&self, id: &OperationId) -> Result<()>;

    /// Per-status counters
    fn counts(&self) -> Result<QueueCounts>;

    /// Move every auth-blocked operation back to pending; returns how many
    fn release_auth_blocked(&self, now_ms: i64) -> Result<usize>;
}

const OPERATION_COLUMNS: &str = "id, op_type, resource, record_id, payload, base_snapshot, \
     status, retry_count, retry_window_base, error, priority, owner_id, scope_id, \
     created_at, next_attempt_at";

/// `SQLite` implementation of `QueueStore`
pub struct SqliteQueueStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedOperation> {
        let id: String = row.get(0)?;
        let op_type: String = row.get(1)?;
        let resource: String = row.get(2)?;
        let payload: Value = row.get(4)?;
        let base_snapshot: Option<Value> = row.get(5)?;
        let status: String = row.get(6)?;
        let priority: i64 = row.get(10)?;

        Ok(QueuedOperation {
            id: id.parse().map_err(|e| column_err(0, e))?,
            op_type: op_type.parse().map_err(|e| column_err(1, e))?,
            resource: resource.parse().map_err(|e| column_err(2, e))?,
            record_id: row.get(3)?,
            payload: as_map(payload),
            base_snapshot: base_snapshot.map(as_map),
            status: status.parse().map_err(|e| column_err(6, e))?,
            retry_count: row.get(7)?,
            retry_window_base: row.get(8)?,
            error: row.get(9)?,
            priority: crate::models::Priority::from_rank(priority)
                .map_err(|e| column_err(10, e))?,
            owner_id: row.get(11)?,
            scope_id: row.get(12)?,
            created_at: row.get(13)?,
            next_attempt_at: row.get(14)?,
        })
    }
}

impl QueueStore for SqliteQueueStore<'_> {
    fn enqueue(&self, op: &QueuedOperation) -> Result<()> {
        if op.op_type == OperationType::Create {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT id FROM queued_operations
                     WHERE resource = ? AND record_id = ? AND op_type = 'create'",
                    params![op.resource.as_str(), op.record_id],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.is_some() {
                return Err(Error::DuplicateOperation {
                    resource: op.resource.as_str().to_string(),
                    record_id: op.record_id.clone(),
                });
            }
        }

        self.conn.execute(
            "INSERT INTO queued_operations (
                id, op_type, resource, record_id, payload, base_snapshot,
                status, retry_count, retry_window_base, error, priority,
                owner_id, scope_id, created_at, next_attempt_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                op.id.as_str(),
                op.op_type.as_str(),
                op.resource.as_str(),
                op.record_id,
                Value::Object(op.payload.clone()),
                op.base_snapshot.clone().map(Value::Object),
                op.status.as_str(),
                op.retry_count,
                op.retry_window_base,
                op.error,
                op.priority.rank(),
                op.owner_id,
                op.scope_id,
                op.created_at,
                op.next_attempt_at,
            ],
        )?;

        Ok(())
    }

    fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        let result = self.conn.query_row(
            &format!("SELECT {OPERATION_COLUMNS} FROM queued_operations WHERE id = ?"),
            params![id.as_str()],
            Self::parse_operation,
        );

        match result {
            Ok(op) => Ok(Some(op)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<QueuedOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM queued_operations
             ORDER BY priority DESC, created_at ASC"
        ))?;

        let operations = stmt
            .query_map([], Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(operations)
    }

    fn due(&self, now_ms: i64) -> Result<Vec<QueuedOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM queued_operations
             WHERE status = 'pending' AND next_attempt_at <= ?
             ORDER BY priority DESC, created_at ASC"
        ))?;

        let operations = stmt
            .query_map(params![now_ms], Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(operations)
    }

    fn update(&self, id: &OperationId, patch: &OperationPatch) -> Result<QueuedOperation> {
        let mut op = self
            .get(id)?
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
        patch.apply_to(&mut op);

        self.conn.execute(
            "UPDATE queued_operations
             SET payload = ?, base_snapshot = ?, status = ?, retry_count = ?,
                 retry_window_base = ?, error = ?, next_attempt_at = ?
             WHERE id = ?",
            params![
                Value::Object(op.payload.clone()),
                op.base_snapshot.clone().map(Value::Object),
                op.status.as_str(),
                op.retry_count,
                op.retry_window_base,
                op.error,
                op.next_attempt_at,
                id.as_str(),
            ],
        )?;

        Ok(op)
    }

    fn dequeue(&self, id: &OperationId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM queued_operations WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn counts(&self) -> Result<QueueCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM queued_operations GROUP BY status")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status.parse::<OperationStatus>()? {
                OperationStatus::Pending => counts.pending = count,
                OperationStatus::Syncing => counts.syncing = count,
                OperationStatus::Failed => counts.failed = count,
                OperationStatus::NeedsReview => counts.needs_review = count,
                OperationStatus::PendingAuth => counts.pending_auth = count,
            }
        }

        Ok(counts)
    }

    fn release_auth_blocked(&self, now_ms: i64) -> Result<usize> {
        let released = self.conn.execute(
            "UPDATE queued_operations
             SET status = 'pending', next_attempt_at = ?
             WHERE status = 'pending_auth'",
            params![now_ms],
        )?;
        Ok(released)
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn column_err<E>(index: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}
