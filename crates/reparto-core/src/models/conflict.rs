//! Conflict report model.
//!
//! Reports are derived on demand by the detector and never persisted;
//! the queue row only keeps a short summary in its `error` field while
//! the operation awaits review.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// One divergently edited field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictDetail {
    /// Field name within the payload
    pub field: String,
    /// Value known when the local edit began
    pub base: Value,
    /// Value the local mutation wants to write
    pub local: Value,
    /// Value currently on the server
    pub remote: Value,
}

/// Shape of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed one or more fields since the base snapshot
    DivergentFields,
    /// The remote record vanished after the local edit began
    DeletedRemotely,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DivergentFields => f.write_str("divergent_fields"),
            Self::DeletedRemotely => f.write_str("deleted_remotely"),
        }
    }
}

/// Full conflict description surfaced to the resolution step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub details: Vec<ConflictDetail>,
}

impl ConflictReport {
    /// Names of the conflicting fields, in report order
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.details.iter().map(|d| d.field.as_str()).collect()
    }

    /// One-line summary stored on the queue row while awaiting review
    #[must_use]
    pub fn summary(&self) -> String {
        match self.kind {
            ConflictKind::DeletedRemotely => "record was deleted remotely".to_string(),
            ConflictKind::DivergentFields => {
                format!("divergent edits on: {}", self.fields().join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_summary_lists_fields() {
        let report = ConflictReport {
            kind: ConflictKind::DivergentFields,
            details: vec![
                ConflictDetail {
                    field: "status".to_string(),
                    base: json!("packed"),
                    local: json!("delivered"),
                    remote: json!("cancelled"),
                },
                ConflictDetail {
                    field: "weight".to_string(),
                    base: json!(10),
                    local: json!(15),
                    remote: json!(12),
                },
            ],
        };
        assert_eq!(report.summary(), "divergent edits on: status, weight");
    }

    #[test]
    fn test_summary_for_remote_deletion() {
        let report = ConflictReport {
            kind: ConflictKind::DeletedRemotely,
            details: vec![],
        };
        assert_eq!(report.summary(), "record was deleted remotely");
    }
}
