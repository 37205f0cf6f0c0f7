// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable queue of pending operations.
//!
//! Every operation lives as one JSON record in the `queue` namespace of a
//! [`KvStore`]. An in-memory copy, kept in FIFO order, answers reads. Each
//! state transition is written to the store first and only then applied in
//! memory, so a crash at any point leaves the store describing a state the
//! caller may have been told about, never one it was not.
//!
//! Dispatch rules enforced at the read boundary:
//! - at most one operation per entity is `InFlight`
//! - only the oldest unsettled operation of an entity is eligible, so a
//!   retry waiting out its backoff still holds back younger siblings

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::add_duration;
use crate::error::{Error, Result};
use crate::op::{EntityKey, FailureKind, OperationId, OperationStatus, PendingOperation, Version};
use crate::retry::RetryPolicy;
use crate::store::KvStore;

/// Namespace holding live operation records.
pub const QUEUE_NS: &str = "queue";
/// Namespace holding records that could not be decoded.
pub const CORRUPT_NS: &str = "queue.corrupt";

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// A retry is scheduled.
    Retry {
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        delay: std::time::Duration,
    },
    /// Retries are exhausted (or the failure is permanent).
    DeadLettered { attempts: u32 },
}

/// A queue record that could not be decoded, kept as found.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CorruptRecord {
    /// Store key, normally the operation id.
    pub key: String,
    /// The stored bytes, lossily decoded as UTF-8.
    pub raw: String,
}

/// Per-status operation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub dead_letter: usize,
    pub completed: usize,
}

impl QueueCounts {
    /// Operations not yet settled.
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_flight + self.failed
    }
}

/// The durable operation queue.
pub struct OperationQueue<S: KvStore> {
    store: S,
    retry: RetryPolicy,
    ops: Mutex<Vec<PendingOperation>>,
    corrupt: Vec<CorruptRecord>,
}

impl<S: KvStore> OperationQueue<S> {
    /// Loads the queue from the store.
    ///
    /// Operations left `InFlight` by a previous process are reset to
    /// `Pending` (their remote apply is idempotent), except those parked on
    /// an unresolved conflict. Undecodable records are moved to
    /// [`CORRUPT_NS`] and counted as dead letters.
    pub fn open(store: S, retry: RetryPolicy) -> Result<Self> {
        let mut ops = Vec::new();

        for (key, bytes) in store.scan(QUEUE_NS)? {
            match serde_json::from_slice::<PendingOperation>(&bytes) {
                Ok(mut op) => {
                    if op.status == OperationStatus::InFlight && op.conflict_id.is_none() {
                        tracing::info!(
                            op = %op.id,
                            entity = %op.entity(),
                            "recovering in-flight operation"
                        );
                        op.status = OperationStatus::Pending;
                        store.put(QUEUE_NS, op.id.as_str(), &serde_json::to_vec(&op)?)?;
                    }
                    ops.push(op);
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "quarantining corrupt queue record");
                    store.put(CORRUPT_NS, &key, &bytes)?;
                    store.delete(QUEUE_NS, &key)?;
                }
            }
        }

        let corrupt = store
            .scan(CORRUPT_NS)?
            .into_iter()
            .map(|(key, bytes)| CorruptRecord {
                key,
                raw: String::from_utf8_lossy(&bytes).into_owned(),
            })
            .collect();
        // Scan order is insertion order; a stable sort keeps it for equal timestamps
        ops.sort_by_key(|op| op.created_at);

        Ok(OperationQueue { store, retry, ops: Mutex::new(ops), corrupt })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingOperation>> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, op: &PendingOperation) -> Result<()> {
        let json = serde_json::to_vec(op)?;
        self.store.put(QUEUE_NS, op.id.as_str(), &json)
    }

    /// Durably records a new operation.
    ///
    /// Enqueueing an id that already exists is a no-op returning that id.
    /// Operations are placed by `created_at`, after any with the same time.
    pub fn enqueue(&self, op: PendingOperation) -> Result<OperationId> {
        op.validate()?;
        let mut ops = self.lock();

        if ops.iter().any(|existing| existing.id == op.id) {
            tracing::debug!(op = %op.id, "operation already queued");
            return Ok(op.id);
        }

        self.persist(&op)?;
        let id = op.id.clone();
        let position = ops.partition_point(|existing| existing.created_at <= op.created_at);
        ops.insert(position, op);
        Ok(id)
    }

    /// Returns up to `limit` operations eligible for dispatch, oldest first.
    pub fn list_pending(&self, limit: usize, now: DateTime<Utc>) -> Vec<PendingOperation> {
        let ops = self.lock();

        let mut blocked: HashSet<EntityKey> = ops
            .iter()
            .filter(|op| op.status == OperationStatus::InFlight)
            .map(PendingOperation::entity)
            .collect();

        let mut batch = Vec::new();
        for op in ops.iter() {
            if batch.len() >= limit {
                break;
            }
            if !matches!(op.status, OperationStatus::Pending | OperationStatus::Failed) {
                continue;
            }
            // First unsettled op claims the entity, eligible or not
            if !blocked.insert(op.entity()) {
                continue;
            }
            let due = op.next_attempt_at.map_or(true, |at| at <= now);
            if op.status == OperationStatus::Pending || due {
                batch.push(op.clone());
            }
        }
        batch
    }

    /// When the earliest retry that [`Self::list_pending`] would hand out
    /// falls due. Failed operations held back by a sibling do not count.
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        let ops = self.lock();
        let mut blocked: HashSet<EntityKey> = ops
            .iter()
            .filter(|op| op.status == OperationStatus::InFlight)
            .map(PendingOperation::entity)
            .collect();

        ops.iter()
            .filter(|op| matches!(op.status, OperationStatus::Pending | OperationStatus::Failed))
            .filter(|op| blocked.insert(op.entity()))
            .filter(|op| op.status == OperationStatus::Failed)
            .filter_map(|op| op.next_attempt_at)
            .min()
    }

    /// Applies a transition to one operation: persist first, then publish.
    fn transition<F>(&self, id: &OperationId, apply: F) -> Result<PendingOperation>
    where
        F: FnOnce(&[PendingOperation], &mut PendingOperation) -> Result<()>,
    {
        let mut ops = self.lock();
        let index = ops
            .iter()
            .position(|op| &op.id == id)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        let mut updated = ops[index].clone();
        apply(&ops, &mut updated)?;
        self.persist(&updated)?;
        ops[index] = updated.clone();
        Ok(updated)
    }

    /// Claims an operation for dispatch.
    ///
    /// Fails with [`Error::EntityBusy`] if a sibling is already in flight.
    pub fn mark_in_flight(&self, id: &OperationId, now: DateTime<Utc>) -> Result<PendingOperation> {
        self.transition(id, |all, op| {
            if !matches!(op.status, OperationStatus::Pending | OperationStatus::Failed) {
                return Err(invalid(op, OperationStatus::InFlight));
            }
            let entity = op.entity();
            let busy = all.iter().any(|other| {
                other.id != op.id
                    && other.status == OperationStatus::InFlight
                    && other.targets(&entity)
            });
            if busy {
                return Err(Error::EntityBusy(entity.to_string()));
            }
            op.status = OperationStatus::InFlight;
            op.last_attempt_at = Some(now);
            op.next_attempt_at = None;
            Ok(())
        })
    }

    /// Marks an operation as settled with the remote.
    pub fn mark_completed(&self, id: &OperationId) -> Result<PendingOperation> {
        self.transition(id, |_, op| {
            if op.status != OperationStatus::InFlight {
                return Err(invalid(op, OperationStatus::Completed));
            }
            op.status = OperationStatus::Completed;
            op.next_attempt_at = None;
            Ok(())
        })
    }

    /// Records a failed attempt.
    ///
    /// Retryable failures schedule another attempt with backoff until the
    /// policy is exhausted; anything else dead-letters immediately.
    pub fn mark_failed(
        &self,
        id: &OperationId,
        kind: FailureKind,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome> {
        let mut outcome = FailOutcome::DeadLettered { attempts: 0 };
        self.transition(id, |_, op| {
            if op.status != OperationStatus::InFlight {
                return Err(invalid(op, OperationStatus::Failed));
            }
            op.attempts = op.attempts.saturating_add(1);
            op.last_error = Some(error.to_string());
            op.last_failure = Some(kind);

            if !kind.is_retryable() {
                op.attempts = op.attempts.max(self.retry.max_attempts);
            }

            if self.retry.is_exhausted(op.attempts) {
                op.status = OperationStatus::DeadLetter;
                op.next_attempt_at = None;
                outcome = FailOutcome::DeadLettered { attempts: op.attempts };
            } else {
                let delay = self.retry.delay_for(op.attempts);
                let next_attempt_at = add_duration(now, delay);
                op.status = OperationStatus::Failed;
                op.next_attempt_at = Some(next_attempt_at);
                outcome = FailOutcome::Retry { attempts: op.attempts, next_attempt_at, delay };
            }
            Ok(())
        })?;
        Ok(outcome)
    }

    /// Parks an in-flight operation on an unresolved conflict.
    ///
    /// The operation stays `InFlight`, holding its entity, until the conflict
    /// is resolved.
    pub fn mark_awaiting_resolution(&self, id: &OperationId, conflict_id: &str) -> Result<()> {
        self.transition(id, |_, op| {
            if op.status != OperationStatus::InFlight {
                return Err(invalid(op, OperationStatus::InFlight));
            }
            op.conflict_id = Some(conflict_id.to_string());
            op.last_failure = Some(FailureKind::VersionConflict);
            op.last_error = Some(format!("version conflict {conflict_id}"));
            Ok(())
        })?;
        Ok(())
    }

    /// Moves a dead letter back to `Pending` with a fresh attempt budget.
    pub fn requeue_dead_letter(&self, id: &OperationId) -> Result<PendingOperation> {
        self.transition(id, |_, op| {
            if op.status != OperationStatus::DeadLetter {
                return Err(invalid(op, OperationStatus::Pending));
            }
            op.status = OperationStatus::Pending;
            op.attempts = 0;
            op.next_attempt_at = None;
            Ok(())
        })
    }

    /// Returns a parked operation to `Pending` when its conflict record was
    /// lost, so it is sent again and the conflict re-detected.
    pub fn unpark(&self, id: &OperationId) -> Result<PendingOperation> {
        self.transition(id, |_, op| {
            if !op.is_awaiting_resolution() {
                return Err(invalid(op, OperationStatus::Pending));
            }
            op.status = OperationStatus::Pending;
            op.conflict_id = None;
            Ok(())
        })
    }

    /// Gives the next chained operation of an entity the base its
    /// predecessor left behind.
    ///
    /// Only the oldest unsettled operation is touched; anything behind it is
    /// chained to that one in turn. Returns true if an operation was rebased.
    pub fn rebase_successor(
        &self,
        entity: &EntityKey,
        version: &Version,
        value: Option<&Value>,
    ) -> Result<bool> {
        let next = self
            .lock()
            .iter()
            .find(|op| {
                op.targets(entity)
                    && matches!(op.status, OperationStatus::Pending | OperationStatus::Failed)
            })
            .filter(|op| op.is_chained())
            .map(|op| op.id.clone());

        let Some(id) = next else {
            return Ok(false);
        };
        self.transition(&id, |_, op| {
            op.base_version = Some(version.clone());
            op.base_value = value.cloned();
            Ok(())
        })?;
        tracing::debug!(op = %id, entity = %entity, base = %version, "rebased chained operation");
        Ok(true)
    }

    /// Returns a claimed operation to `Pending` in memory only.
    ///
    /// Used when the store refused a transition: the operation is retried in
    /// this process, and the store still reads `InFlight`, which recovery
    /// resets the same way on the next start.
    pub fn release(&self, id: &OperationId) {
        let mut ops = self.lock();
        if let Some(op) = ops.iter_mut().find(|op| &op.id == id) {
            if op.status == OperationStatus::InFlight && op.conflict_id.is_none() {
                op.status = OperationStatus::Pending;
            }
        }
    }

    /// Deletes completed operations created before `older_than`.
    pub fn prune(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut ops = self.lock();
        let stale: Vec<OperationId> = ops
            .iter()
            .filter(|op| op.status == OperationStatus::Completed && op.created_at < older_than)
            .map(|op| op.id.clone())
            .collect();

        for id in &stale {
            self.store.delete(QUEUE_NS, id.as_str())?;
            ops.retain(|op| &op.id != id);
        }
        Ok(stale.len())
    }

    /// Looks up one operation.
    pub fn get(&self, id: &OperationId) -> Option<PendingOperation> {
        self.lock().iter().find(|op| &op.id == id).cloned()
    }

    /// Unsettled operations targeting an entity, oldest first.
    pub fn pending_for(&self, entity: &EntityKey) -> Vec<PendingOperation> {
        self.lock()
            .iter()
            .filter(|op| op.targets(entity) && !op.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Operations parked on a conflict.
    pub fn awaiting_resolution(&self) -> Vec<PendingOperation> {
        self.lock().iter().filter(|op| op.is_awaiting_resolution()).cloned().collect()
    }

    /// Operations that will not be retried automatically.
    pub fn dead_letters(&self) -> Vec<PendingOperation> {
        self.lock()
            .iter()
            .filter(|op| op.status == OperationStatus::DeadLetter)
            .cloned()
            .collect()
    }

    /// Records quarantined at open. They count as dead letters but cannot be
    /// requeued.
    pub fn corrupt_records(&self) -> Vec<CorruptRecord> {
        self.corrupt.clone()
    }

    /// Per-status counts. Quarantined records count as dead letters.
    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            dead_letter: self.corrupt.len(),
            ..QueueCounts::default()
        };
        for op in self.lock().iter() {
            match op.status {
                OperationStatus::Pending => counts.pending += 1,
                OperationStatus::InFlight => counts.in_flight += 1,
                OperationStatus::Failed => counts.failed += 1,
                OperationStatus::DeadLetter => counts.dead_letter += 1,
                OperationStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }

    /// Number of unsettled operations.
    pub fn len(&self) -> usize {
        self.counts().outstanding()
    }

    /// Returns true when nothing is waiting to sync.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invalid(op: &PendingOperation, to: OperationStatus) -> Error {
    Error::InvalidTransition {
        id: op.id.to_string(),
        from: op.status.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
