//! Shared models for the offline queue

mod conflict;
mod operation;
mod resource;

pub use conflict::{ConflictDetail, ConflictKind, ConflictReport};
pub use operation::{
    LocalWrite, OperationId, OperationPatch, OperationStatus, OperationType, QueuedOperation,
    SessionContext,
};
pub use resource::{Priority, ResourceKind};
