//! Conflict resolution strategies.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{ConflictKind, ConflictReport, QueuedOperation};
use crate::remote::RemoteRecord;

/// How a reviewed conflict should be settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the local mutation as written
    Local,
    /// Accept the server state and discard the local mutation
    Remote,
    /// Caller supplies the resolved value for every conflicting field
    Merge,
}

impl ResolutionStrategy {
    /// Lowercase label for display
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Outcome of resolving one conflict
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionAction {
    /// Put the operation back in the pending queue with these contents
    Requeue {
        payload: Map<String, Value>,
        base_snapshot: Option<Map<String, Value>>,
    },
    /// Drop the operation; local state refreshes from the server
    Discard,
}

/// Settle a conflict according to `strategy`.
///
/// The requeued base snapshot absorbs the remote values the user just
/// reconciled against, so the re-attempt does not trip over the same
/// conflict. A `deleted_remotely` conflict resolved in favor of the
/// local side requeues without a snapshot: the re-attempt applies as an
/// idempotent create.
pub fn resolve(
    op: &QueuedOperation,
    report: &ConflictReport,
    strategy: ResolutionStrategy,
    merged: Option<&RemoteRecord>,
) -> Result<ResolutionAction> {
    match strategy {
        ResolutionStrategy::Remote => Ok(ResolutionAction::Discard),
        ResolutionStrategy::Local => Ok(ResolutionAction::Requeue {
            payload: op.payload.clone(),
            base_snapshot: refreshed_base(op, report),
        }),
        ResolutionStrategy::Merge => {
            let missing: Vec<String> = report
                .details
                .iter()
                .filter(|detail| {
                    merged.is_none_or(|merged| !merged.contains_key(&detail.field))
                })
                .map(|detail| detail.field.clone())
                .collect();

            if !missing.is_empty() {
                return Err(Error::IncompleteMerge { missing });
            }

            let mut payload = op.payload.clone();
            if let Some(merged) = merged {
                for detail in &report.details {
                    if let Some(value) = merged.get(&detail.field) {
                        payload.insert(detail.field.clone(), value.clone());
                    }
                }
            }

            Ok(ResolutionAction::Requeue {
                payload,
                base_snapshot: refreshed_base(op, report),
            })
        }
    }
}

fn refreshed_base(op: &QueuedOperation, report: &ConflictReport) -> Option<Map<String, Value>> {
    match report.kind {
        ConflictKind::DeletedRemotely => None,
        ConflictKind::DivergentFields => {
            let mut base = op.base_snapshot.clone().unwrap_or_default();
            for detail in &report.details {
                base.insert(detail.field.clone(), detail.remote.clone());
            }
            Some(base)
        }
    }
}
