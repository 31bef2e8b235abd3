//! Offline queue synchronization: detection, resolution, retry, and
//! the orchestrating engine

pub mod detector;
pub mod engine;
pub mod resolver;
pub mod retry;

pub use engine::{
    EngineConfig, Progress, ResolveOutcome, StatusSnapshot, SubmitOutcome, SyncEngine, SyncEvent,
    SyncRun, SyncRunSummary,
};
pub use resolver::{ResolutionAction, ResolutionStrategy};
pub use retry::{Disposition, RetryPolicy};
