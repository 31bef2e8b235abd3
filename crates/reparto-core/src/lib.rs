//! reparto-core - Core library for Reparto
//!
//! This crate contains the offline operation queue, conflict detection
//! and resolution, and the sync engine shared by all Reparto interfaces
//! (desktop, mobile, CLI).

pub mod db;
pub mod error;
pub mod models;
pub mod net;
pub mod remote;
pub mod sync;

pub use error::{Error, Result};
pub use models::{LocalWrite, OperationId, QueuedOperation, ResourceKind, SessionContext};
pub use sync::SyncEngine;
