// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Value-level merge rules.
//!
//! Entity values are JSON. Only top-level object fields are merged; nested
//! values are compared and replaced whole. A `null` field in an update patch
//! removes that field.

use serde_json::{Map, Value};

use super::{ConflictRecord, Strategy};
use crate::op::OperationKind;

/// The outcome of an automatic merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub value: Value,
    pub strategy: Strategy,
    /// Losing values of last-writer-wins decisions, if any.
    pub discarded: Option<Value>,
}

/// Applies a local mutation body on top of `onto`.
pub fn apply_local(kind: OperationKind, payload: &Value, onto: &Value) -> Value {
    match kind {
        OperationKind::Create => payload.clone(),
        OperationKind::Delete => Value::Null,
        OperationKind::Update => {
            let Some(patch) = payload.as_object() else {
                return payload.clone();
            };
            let mut fields = onto.as_object().cloned().unwrap_or_default();
            for (field, value) in patch {
                set_field(&mut fields, field, value);
            }
            Value::Object(fields)
        }
    }
}

/// Three-way merge of an update patch into the remote value.
///
/// Fields changed only locally are applied, fields changed only remotely are
/// kept, and fields both sides changed go to the later writer. Anything other
/// than an object patch against an object value is decided whole by
/// [`last_writer_wins`]. Returns `None` when a field holds structurally
/// incompatible values on each side (for example an array against a string).
pub fn field_merge(conflict: &ConflictRecord) -> Option<Merged> {
    let (Some(patch), Some(remote)) =
        (conflict.local_value.as_object(), conflict.remote_value.as_object())
    else {
        return Some(last_writer_wins(conflict));
    };
    if conflict.kind != OperationKind::Update {
        return Some(last_writer_wins(conflict));
    }

    let base = conflict.base_value.as_ref().and_then(Value::as_object);
    let local_wins = local_is_newer(conflict);
    let mut merged = remote.clone();
    let mut discarded = Map::new();

    for (field, local) in patch {
        let remote_field = remote.get(field).unwrap_or(&Value::Null);
        if local == remote_field {
            continue;
        }

        let untouched_remotely =
            base.is_some_and(|b| b.get(field).unwrap_or(&Value::Null) == remote_field);
        if untouched_remotely {
            set_field(&mut merged, field, local);
            continue;
        }

        if !compatible(local, remote_field) {
            return None;
        }
        if local_wins {
            discarded.insert(field.clone(), remote_field.clone());
            set_field(&mut merged, field, local);
        } else {
            discarded.insert(field.clone(), local.clone());
        }
    }

    let (strategy, discarded) = if discarded.is_empty() {
        (Strategy::FieldMerge, None)
    } else {
        (Strategy::LastWriterWins, Some(Value::Object(discarded)))
    };
    Some(Merged { value: Value::Object(merged), strategy, discarded })
}

/// Whole-value resolution by write time.
///
/// The local write wins only when it is strictly newer than a known remote
/// modification time.
pub fn last_writer_wins(conflict: &ConflictRecord) -> Merged {
    let local = conflict.local_intent();
    let (value, discarded) = if local_is_newer(conflict) {
        (local, conflict.remote_value.clone())
    } else {
        (conflict.remote_value.clone(), local)
    };
    Merged { value, strategy: Strategy::LastWriterWins, discarded: Some(discarded) }
}

/// Builds the operation that turns `remote` into `resolved`.
///
/// Objects produce a minimal update patch (removed fields as `null`), a
/// `null` target a delete, and anything else a whole-value create.
pub fn corrective_patch(remote: &Value, resolved: &Value) -> (OperationKind, Value) {
    match (remote.as_object(), resolved.as_object()) {
        _ if resolved.is_null() => (OperationKind::Delete, Value::Null),
        (Some(from), Some(to)) => {
            let mut patch = Map::new();
            for (field, value) in to {
                if from.get(field) != Some(value) {
                    patch.insert(field.clone(), value.clone());
                }
            }
            for field in from.keys() {
                if !to.contains_key(field) {
                    patch.insert(field.clone(), Value::Null);
                }
            }
            (OperationKind::Update, Value::Object(patch))
        }
        _ => (OperationKind::Create, resolved.clone()),
    }
}

fn local_is_newer(conflict: &ConflictRecord) -> bool {
    conflict
        .remote_modified_at
        .is_some_and(|remote| conflict.local_written_at > remote)
}

fn set_field(fields: &mut Map<String, Value>, field: &str, value: &Value) {
    if value.is_null() {
        fields.remove(field);
    } else {
        fields.insert(field.to_string(), value.clone());
    }
}

#[derive(PartialEq)]
enum Shape {
    Absent,
    Scalar,
    Array,
    Object,
}

fn shape(value: &Value) -> Shape {
    match value {
        Value::Null => Shape::Absent,
        Value::Array(_) => Shape::Array,
        Value::Object(_) => Shape::Object,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Shape::Scalar,
    }
}

fn compatible(a: &Value, b: &Value) -> bool {
    let (a, b) = (shape(a), shape(b));
    a == Shape::Absent || b == Shape::Absent || a == b
}
