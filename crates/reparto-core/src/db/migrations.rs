//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: i32 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if exists == 0 {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: operation queue schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS queued_operations (
            id TEXT PRIMARY KEY,
            op_type TEXT NOT NULL,
            resource TEXT NOT NULL,
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            base_snapshot TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            retry_window_base INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            priority INTEGER NOT NULL DEFAULT 1,
            owner_id TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_order
            ON queued_operations(priority DESC, created_at ASC);
        CREATE INDEX IF NOT EXISTS idx_queue_status
            ON queued_operations(status);
        CREATE INDEX IF NOT EXISTS idx_queue_record
            ON queued_operations(resource, record_id);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: backoff scheduling support
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        ALTER TABLE queued_operations
            ADD COLUMN next_attempt_at INTEGER NOT NULL DEFAULT 0;
        CREATE INDEX IF NOT EXISTS idx_queue_due
            ON queued_operations(status, next_attempt_at);
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
