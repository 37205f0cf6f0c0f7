// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Pending mutations and the identifiers they carry.
//!
//! Every local write becomes a [`PendingOperation`]: a durable record of what
//! the caller intended, which remote version it was computed against, and
//! where it is in its sync lifecycle. Operations are designed to be:
//!
//! - Serializable: stored in the queue and sent over the wire as-is
//! - Idempotent: the `id` doubles as the remote idempotency key, so replaying
//!   an operation after a crash has no additional effect

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Unique identifier for an operation.
///
/// Caller-supplied or generated; the remote uses it to deduplicate replays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Wraps a caller-supplied idempotency key.
    pub fn new(id: impl Into<String>) -> Self {
        OperationId(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        OperationId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        OperationId(s.to_string())
    }
}

/// Opaque remote version token (revision number, CID, etag...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(v: impl Into<String>) -> Self {
        Version(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version(s.to_string())
    }
}

/// Identifies one logical entity: a key within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub collection: String,
    pub key: String,
}

impl EntityKey {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        EntityKey { collection: collection.into(), key: key.into() }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// The kind of mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Payload is the full entity value.
    Create,
    /// Payload is a JSON object of the fields being changed.
    Update,
    /// Payload is ignored.
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(Error::InvalidInput(format!(
                "invalid operation kind: '{s}'\n  hint: valid kinds are: create, update, delete"
            ))),
        }
    }
}

/// Lifecycle state of a pending operation.
///
/// `Completed` and `DeadLetter` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Claimed by the dispatcher (or parked on an unresolved conflict).
    InFlight,
    /// Failed transiently; retry scheduled at `next_attempt_at`.
    Failed,
    /// Will not be retried automatically.
    DeadLetter,
    /// Settled with the remote.
    Completed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::Failed => "failed",
            OperationStatus::DeadLetter => "dead_letter",
            OperationStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::DeadLetter)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of the most recent failure of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, timeout, or 5xx. Retried with backoff.
    TransientNetwork,
    /// Remote version moved on. Routed to the conflict resolver.
    VersionConflict,
    /// Rejected by the remote as invalid. Dead-lettered.
    Validation,
    /// The stored record could not be read back. Dead-lettered.
    StorageCorruption,
}

impl FailureKind {
    /// Whether failures of this kind are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::TransientNetwork)
    }
}

/// A durable record of one intended mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub collection: String,
    pub key: String,
    pub payload: Value,
    /// Remote version the mutation was computed against. `None` for creates
    /// and for operations chained behind an unsettled sibling, which are
    /// rebased when that sibling settles.
    pub base_version: Option<Version>,
    /// Cached remote value at `base_version`, when known at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<Value>,
    pub status: OperationStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
    /// Set while the operation waits on an unresolved conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
}

impl PendingOperation {
    /// Creates a fresh `Pending` operation.
    pub fn new(
        id: OperationId,
        kind: OperationKind,
        entity: EntityKey,
        payload: Value,
        base_version: Option<Version>,
        created_at: DateTime<Utc>,
    ) -> Self {
        PendingOperation {
            id,
            kind,
            collection: entity.collection,
            key: entity.key,
            payload,
            base_version,
            base_value: None,
            status: OperationStatus::Pending,
            attempts: 0,
            created_at,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            last_failure: None,
            conflict_id: None,
        }
    }

    /// Attaches the remote value the mutation was computed against.
    pub fn with_base_value(mut self, base_value: Option<Value>) -> Self {
        self.base_value = base_value;
        self
    }

    /// Returns the entity this operation targets.
    pub fn entity(&self) -> EntityKey {
        EntityKey::new(self.collection.clone(), self.key.clone())
    }

    /// Returns true if this operation targets the given entity.
    pub fn targets(&self, entity: &EntityKey) -> bool {
        self.collection == entity.collection && self.key == entity.key
    }

    /// Returns true while the operation is parked on an unresolved conflict.
    pub fn is_awaiting_resolution(&self) -> bool {
        self.status == OperationStatus::InFlight && self.conflict_id.is_some()
    }

    /// Returns true if this operation waits for a predecessor to supply its
    /// base version.
    pub fn is_chained(&self) -> bool {
        self.kind != OperationKind::Create && self.base_version.is_none()
    }

    /// Checks that the payload has the shape its kind requires.
    pub fn validate(&self) -> Result<(), Error> {
        if self.collection.is_empty() || self.key.is_empty() {
            return Err(Error::InvalidInput(
                "collection and key must not be empty".to_string(),
            ));
        }
        match self.kind {
            OperationKind::Create if self.payload.is_null() => Err(Error::InvalidInput(
                "create payload must not be null\n  hint: use a delete operation instead"
                    .to_string(),
            )),
            OperationKind::Update if !self.payload.is_object() => Err(Error::InvalidInput(
                "update payload must be a JSON object of changed fields".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "op_tests.rs"]
mod tests;
