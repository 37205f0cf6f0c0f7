// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The remote "apply operation" seam.
//!
//! Provides a trait-based boundary that enables:
//! - A WebSocket client in the daemon
//! - Scripted in-memory remotes for tests
//!
//! Methods take `&self` so the dispatcher can keep several requests in
//! flight against one remote.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conflict::RemoteRecord;
use crate::op::{EntityKey, FailureKind, OperationId, OperationKind, PendingOperation, Version};

/// Boxed future returned by [`RemoteApi`] methods.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a fetch yields: `Ok(None)` when the entity does not exist.
pub type FetchResult = Result<Option<RemoteRecord>, RemoteError>;

/// Failure reported by the remote or the path to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum RemoteError {
    /// Network trouble, timeouts, 5xx. Worth retrying.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote refused the mutation as invalid. Retrying cannot help.
    #[error("rejected by remote: {0}")]
    Validation(String),
}

impl RemoteError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RemoteError::Transient(_) => FailureKind::TransientNetwork,
            RemoteError::Validation(_) => FailureKind::Validation,
        }
    }
}

/// One mutation as sent to the remote.
///
/// `base_version` is the optimistic-concurrency precondition and
/// `operation_id` the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub operation_id: OperationId,
    pub collection: String,
    pub key: String,
    pub kind: OperationKind,
    pub payload: Value,
    pub base_version: Option<Version>,
}

impl ApplyRequest {
    pub fn entity(&self) -> EntityKey {
        EntityKey::new(self.collection.clone(), self.key.clone())
    }
}

impl From<&PendingOperation> for ApplyRequest {
    fn from(op: &PendingOperation) -> Self {
        ApplyRequest {
            operation_id: op.id.clone(),
            collection: op.collection.clone(),
            key: op.key.clone(),
            kind: op.kind,
            payload: op.payload.clone(),
            base_version: op.base_version.clone(),
        }
    }
}

/// What the remote did with an [`ApplyRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Accepted. Carries the canonical value (`null` after a delete) and the
    /// new version.
    Applied {
        value: Value,
        version: Version,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_at: Option<DateTime<Utc>>,
    },
    /// Precondition failed; carries the remote's current state.
    Conflict(RemoteRecord),
    Failed(RemoteError),
}

/// The remote endpoint the engine syncs with.
pub trait RemoteApi: Send + Sync {
    /// Applies one operation.
    fn apply_operation(&self, request: ApplyRequest) -> RemoteFuture<'_, ApplyOutcome>;

    /// Reads the current state of an entity. `Ok(None)` means it does not
    /// exist.
    fn fetch(&self, entity: EntityKey) -> RemoteFuture<'_, FetchResult>;
}

impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    fn apply_operation(&self, request: ApplyRequest) -> RemoteFuture<'_, ApplyOutcome> {
        (**self).apply_operation(request)
    }

    fn fetch(&self, entity: EntityKey) -> RemoteFuture<'_, FetchResult> {
        (**self).fetch(entity)
    }
}
