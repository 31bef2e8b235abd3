//! Per-field conflict detection against a captured base snapshot.
//!
//! Three-way comparison per payload field: the base snapshot (what the
//! record looked like when the local edit began), the local mutation,
//! and the record currently on the server. The server having moved away
//! from the base is only a conflict when the local side wants something
//! different from where the server ended up.

use serde_json::Value;

use crate::models::{ConflictDetail, ConflictKind, ConflictReport, OperationType, QueuedOperation};
use crate::remote::RemoteRecord;

/// Classify an operation against the current remote record.
///
/// `remote` is `None` when the record no longer exists on the server.
/// Returns `None` when the operation may proceed; determinism is
/// guaranteed because payload maps iterate in sorted key order.
#[must_use]
pub fn detect(op: &QueuedOperation, remote: Option<&RemoteRecord>) -> Option<ConflictReport> {
    // no ancestor to diff against: creates, and updates re-queued as
    // upserts after a deleted-remotely resolution
    let base = op.base_snapshot.as_ref()?;

    match op.op_type {
        OperationType::Create => None,
        OperationType::Update => match remote {
            None => Some(deleted_remotely(op)),
            Some(remote) => divergent_fields(op, remote),
        },
        OperationType::Delete => match remote {
            None => Some(ConflictReport {
                kind: ConflictKind::DeletedRemotely,
                details: Vec::new(),
            }),
            Some(remote) => delete_drift(base, remote),
        },
    }
}

/// Fields where both sides moved away from the base in different directions
fn divergent_fields(op: &QueuedOperation, remote: &RemoteRecord) -> Option<ConflictReport> {
    let base = op.base_snapshot.as_ref()?;
    let mut details = Vec::new();

    for (field, local) in &op.payload {
        let base_value = base.get(field).cloned().unwrap_or(Value::Null);
        let remote_value = remote.get(field).cloned().unwrap_or(Value::Null);

        if base_value == remote_value {
            // server unchanged since the edit began; local wins trivially
            continue;
        }
        if *local == remote_value {
            // both sides converged on the same value independently
            continue;
        }
        details.push(ConflictDetail {
            field: field.clone(),
            base: base_value,
            local: local.clone(),
            remote: remote_value,
        });
    }

    if details.is_empty() {
        None
    } else {
        Some(ConflictReport {
            kind: ConflictKind::DivergentFields,
            details,
        })
    }
}

/// The record vanished under an update: report every payload field so a
/// merge resolution has a concrete field list to satisfy
fn deleted_remotely(op: &QueuedOperation) -> ConflictReport {
    let base = op.base_snapshot.as_ref();
    let details = op
        .payload
        .iter()
        .map(|(field, local)| ConflictDetail {
            field: field.clone(),
            base: base
                .and_then(|b| b.get(field))
                .cloned()
                .unwrap_or(Value::Null),
            local: local.clone(),
            remote: Value::Null,
        })
        .collect();

    ConflictReport {
        kind: ConflictKind::DeletedRemotely,
        details,
    }
}

/// A delete conflicts when someone edited the record after the snapshot
fn delete_drift(base: &RemoteRecord, remote: &RemoteRecord) -> Option<ConflictReport> {
    let mut fields: Vec<&String> = base.keys().chain(remote.keys()).collect();
    fields.sort();
    fields.dedup();

    let details: Vec<ConflictDetail> = fields
        .into_iter()
        .filter_map(|field| {
            let base_value = base.get(field).cloned().unwrap_or(Value::Null);
            let remote_value = remote.get(field).cloned().unwrap_or(Value::Null);
            if base_value == remote_value {
                None
            } else {
                Some(ConflictDetail {
                    field: field.clone(),
                    base: base_value,
                    local: Value::Null,
                    remote: remote_value,
                })
            }
        })
        .collect();

    if details.is_empty() {
        None
    } else {
        Some(ConflictReport {
            kind: ConflictKind::DivergentFields,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::models::{LocalWrite, ResourceKind, SessionContext};

    fn session() -> SessionContext {
        SessionContext::new("user-1", "coop-1")
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn update_op(payload: Value, base: Value) -> QueuedOperation {
        QueuedOperation::new(
            LocalWrite::update(ResourceKind::Delivery, "d1", map(payload), map(base)),
            &session(),
        )
    }

    #[test]
    fn test_unchanged_server_is_not_a_conflict() {
        let op = update_op(json!({"weight": 15}), json!({"weight": 10}));
        let remote = map(json!({"weight": 10}));
        assert_eq!(detect(&op, Some(&remote)), None);
    }

    #[test]
    fn test_convergent_edit_is_not_a_conflict() {
        let op = update_op(json!({"weight": 15}), json!({"weight": 10}));
        let remote = map(json!({"weight": 15}));
        assert_eq!(detect(&op, Some(&remote)), None);
    }

    #[test]
    fn test_divergent_edit_is_reported_per_field() {
        let op = update_op(
            json!({"weight": 15, "status": "delivered"}),
            json!({"weight": 10, "status": "packed"}),
        );
        let remote = map(json!({"weight": 12, "status": "packed"}));

        let report = detect(&op, Some(&remote)).unwrap();
        assert_eq!(report.kind, ConflictKind::DivergentFields);
        assert_eq!(report.fields(), vec!["weight"]);
        assert_eq!(report.details[0].base, json!(10));
        assert_eq!(report.details[0].local, json!(15));
        assert_eq!(report.details[0].remote, json!(12));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let op = update_op(
            json!({"weight": 15, "status": "delivered", "address": "Calle 3"}),
            json!({"weight": 10, "status": "packed", "address": "Calle 1"}),
        );
        let remote = map(json!({"weight": 12, "status": "cancelled", "address": "Calle 1"}));

        let first = detect(&op, Some(&remote)).unwrap();
        let second = detect(&op, Some(&remote)).unwrap();
        assert_eq!(first, second);
        // map iteration is key-sorted, so the order is fixed too
        assert_eq!(first.fields(), vec!["status", "weight"]);
    }

    #[test]
    fn test_untouched_server_fields_are_ignored() {
        // remote gained a field the payload never mentions
        let op = update_op(json!({"weight": 15}), json!({"weight": 10}));
        let remote = map(json!({"weight": 10, "driver": "Marta"}));
        assert_eq!(detect(&op, Some(&remote)), None);
    }

    #[test]
    fn test_create_never_conflicts() {
        let op = QueuedOperation::new(
            LocalWrite::create(
                ResourceKind::Delivery,
                "d1",
                map(json!({"address": "Calle 12", "weight": 10})),
            ),
            &session(),
        );
        let remote = map(json!({"address": "Otra", "weight": 99}));
        assert_eq!(detect(&op, Some(&remote)), None);
        assert_eq!(detect(&op, None), None);
    }

    #[test]
    fn test_missing_remote_during_update_is_deleted_remotely() {
        let op = update_op(json!({"weight": 15}), json!({"weight": 10}));

        let report = detect(&op, None).unwrap();
        assert_eq!(report.kind, ConflictKind::DeletedRemotely);
        assert_eq!(report.fields(), vec!["weight"]);
        assert_eq!(report.details[0].remote, Value::Null);
    }

    #[test]
    fn test_delete_conflicts_when_record_drifted() {
        let op = QueuedOperation::new(
            LocalWrite::delete(
                ResourceKind::Delivery,
                "d1",
                Some(map(json!({"weight": 10, "status": "packed"}))),
            ),
            &session(),
        );
        let remote = map(json!({"weight": 10, "status": "delivered"}));

        let report = detect(&op, Some(&remote)).unwrap();
        assert_eq!(report.kind, ConflictKind::DivergentFields);
        assert_eq!(report.fields(), vec!["status"]);
    }

    #[test]
    fn test_delete_of_missing_record_is_a_conflict() {
        let op = QueuedOperation::new(
            LocalWrite::delete(
                ResourceKind::Delivery,
                "d1",
                Some(map(json!({"weight": 10}))),
            ),
            &session(),
        );

        let report = detect(&op, None).unwrap();
        assert_eq!(report.kind, ConflictKind::DeletedRemotely);
        assert!(report.details.is_empty());
    }

    #[test]
    fn test_delete_of_unchanged_record_proceeds() {
        let op = QueuedOperation::new(
            LocalWrite::delete(
                ResourceKind::Delivery,
                "d1",
                Some(map(json!({"weight": 10}))),
            ),
            &session(),
        );
        let remote = map(json!({"weight": 10}));
        assert_eq!(detect(&op, Some(&remote)), None);
    }
}
