// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict detection and resolution.
//!
//! A conflict arises when the remote rejects an operation because its
//! `base_version` is stale *and* the local change would actually alter the
//! remote value. Resolution follows the collection's [`Strategy`]:
//!
//! ```text
//! field_merge ──► disjoint fields merged ──► overlaps by last writer ──► done
//!      │                                                              ▲
//!      └── structurally incompatible field ──► manual                 │
//! last_writer_wins ───────────────────────────────────────────────────┘
//! manual ──► waits for resolve(conflict_id, choice)
//! ```

mod merge;
mod resolver;

pub use merge::{apply_local, corrective_patch, field_merge, last_writer_wins, Merged};
pub use resolver::{ConflictResolver, CONFLICTS_NS};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::op::{EntityKey, OperationId, OperationKind, PendingOperation, Version};

/// How a collection's conflicts are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Three-way merge of top-level fields, last writer wins on overlaps.
    #[default]
    FieldMerge,
    /// Whole value goes to the later write.
    LastWriterWins,
    /// Never resolved automatically.
    Manual,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FieldMerge => "field_merge",
            Strategy::LastWriterWins => "last_writer_wins",
            Strategy::Manual => "manual",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "field_merge" => Ok(Strategy::FieldMerge),
            "last_writer_wins" | "lww" => Ok(Strategy::LastWriterWins),
            "manual" => Ok(Strategy::Manual),
            _ => Err(Error::InvalidInput(format!(
                "unknown merge strategy '{s}' (expected field_merge, last_writer_wins or manual)"
            ))),
        }
    }
}

/// Lifecycle of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// The remote's current state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Current value; `null` when the entity does not exist remotely.
    pub value: Value,
    pub version: Version,
    /// Last modification time, when the remote reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// How a caller settles a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    /// Apply an automatic strategy now.
    Strategy(Strategy),
    /// Use this exact value.
    Value(Value),
}

/// A detected divergence between a local operation and the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    pub entity: EntityKey,
    pub operation_id: OperationId,
    pub kind: OperationKind,
    /// The local mutation body as queued.
    pub local_value: Value,
    pub local_base_version: Option<Version>,
    pub local_written_at: DateTime<Utc>,
    /// Remote value at `local_base_version`, when it was known locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<Value>,
    pub remote_value: Value,
    pub remote_version: Version,
    pub remote_modified_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub strategy_used: Option<Strategy>,
    pub resolved_value: Option<Value>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Values that lost a last-writer-wins decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discarded_value: Option<Value>,
}

impl ConflictRecord {
    /// The full value the local operation intended, applied on the remote.
    pub fn local_intent(&self) -> Value {
        apply_local(self.kind, &self.local_value, &self.remote_value)
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ConflictStatus::Resolved
    }
}

/// Decides whether a rejected operation is a real conflict.
///
/// Returns `None` when the versions agree or when applying the local change
/// on top of the remote value would leave it unchanged.
pub fn detect(
    op: &PendingOperation,
    remote: &RemoteRecord,
    now: DateTime<Utc>,
) -> Option<ConflictRecord> {
    if op.base_version.as_ref() == Some(&remote.version) {
        return None;
    }
    if apply_local(op.kind, &op.payload, &remote.value) == remote.value {
        return None;
    }

    Some(ConflictRecord {
        id: uuid::Uuid::new_v4().to_string(),
        entity: op.entity(),
        operation_id: op.id.clone(),
        kind: op.kind,
        local_value: op.payload.clone(),
        local_base_version: op.base_version.clone(),
        local_written_at: op.created_at,
        base_value: op.base_value.clone(),
        remote_value: remote.value.clone(),
        remote_version: remote.version.clone(),
        remote_modified_at: remote.modified_at,
        detected_at: now,
        status: ConflictStatus::Unresolved,
        strategy_used: None,
        resolved_value: None,
        resolved_at: None,
        discarded_value: None,
    })
}
