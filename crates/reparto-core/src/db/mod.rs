//! Database layer for Reparto

mod connection;
mod migrations;
mod queue_repository;

pub use connection::Database;
pub use queue_repository::{QueueCounts, QueueStore, SqliteQueueStore};
