// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The sync engine and its caller-facing surface.
//!
//! ```text
//!  enqueue_mutation ──► OperationQueue ──► dispatcher ──► RemoteApi
//!        ▲                    │                │
//!  get_cached_value ◄── ReadThroughCache ◄─────┤ applied
//!                                              ▼ conflict
//!  resolve_conflict ──────────────────► ConflictResolver
//! ```
//!
//! The engine is constructed explicitly with its store, remote and clock.
//! Sync cycles are driven by [`crate::worker::SyncWorker`] or by calling
//! [`SyncEngine::run_cycle`] directly.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cache::{overlay, CacheRead, ReadThroughCache};
use crate::clock::{sub_duration, ClockSource};
use crate::config::EngineConfig;
use crate::conflict::{corrective_patch, ConflictRecord, ConflictResolver, Resolution};
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::dispatcher::SingleFlight;
use crate::error::{Error, Result};
use crate::op::{EntityKey, OperationId, OperationKind, OperationStatus, PendingOperation, Version};
use crate::queue::{CorruptRecord, OperationQueue, QueueCounts};
use crate::remote::{RemoteApi, RemoteError};
use crate::store::KvStore;

/// A local write as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Idempotency key; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    pub kind: OperationKind,
    pub entity: EntityKey,
    #[serde(default)]
    pub payload: Value,
    /// Remote version the write was computed against. Taken from the cache
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Version>,
}

impl Mutation {
    pub fn create(entity: EntityKey, value: Value) -> Self {
        Mutation {
            operation_id: None,
            kind: OperationKind::Create,
            entity,
            payload: value,
            base_version: None,
        }
    }

    /// An update carrying only the changed fields (`null` removes a field).
    pub fn update(entity: EntityKey, patch: Value) -> Self {
        Mutation {
            operation_id: None,
            kind: OperationKind::Update,
            entity,
            payload: patch,
            base_version: None,
        }
    }

    pub fn delete(entity: EntityKey) -> Self {
        Mutation {
            operation_id: None,
            kind: OperationKind::Delete,
            entity,
            payload: Value::Null,
            base_version: None,
        }
    }

    pub fn with_id(mut self, id: OperationId) -> Self {
        self.operation_id = Some(id);
        self
    }

    pub fn with_base_version(mut self, version: Version) -> Self {
        self.base_version = Some(version);
        self
    }
}

/// Snapshot of engine health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub connectivity: Connectivity,
    pub queue: QueueCounts,
    pub unresolved_conflicts: usize,
    pub cached_entries: usize,
    pub syncing: bool,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_cache_entries: usize,
    pub pruned_operations: usize,
    pub pruned_conflicts: usize,
}

/// Offline-first sync engine.
pub struct SyncEngine<S: KvStore, R: RemoteApi> {
    pub(crate) queue: OperationQueue<S>,
    pub(crate) conflicts: ConflictResolver<S>,
    pub(crate) cache: ReadThroughCache,
    pub(crate) monitor: ConnectivityMonitor,
    pub(crate) remote: R,
    pub(crate) clock: Arc<dyn ClockSource>,
    pub(crate) config: EngineConfig,
    pub(crate) gate: SingleFlight,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl<S: KvStore + Clone, R: RemoteApi> SyncEngine<S, R> {
    /// Opens the engine over a store, starting offline.
    ///
    /// Recovers the queue and conflict log, and finishes any resolution a
    /// previous process recorded but did not get to apply.
    pub fn open(
        store: S,
        remote: R,
        clock: Arc<dyn ClockSource>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let queue = OperationQueue::open(store.clone(), config.retry_policy())?;
        let conflicts =
            ConflictResolver::open(store, config.default_merge_policy, config.collections.clone())?;
        let cache = ReadThroughCache::new(config.cache_ttl(), Arc::clone(&clock));
        let wake = Arc::new(Notify::new());
        let monitor = ConnectivityMonitor::new(
            Connectivity::Offline,
            config.debounce(),
            Arc::clone(&clock),
            Arc::clone(&wake),
        );

        let engine = SyncEngine {
            queue,
            conflicts,
            cache,
            monitor,
            remote,
            clock,
            config,
            gate: SingleFlight::default(),
            wake,
            shutdown: CancellationToken::new(),
        };
        engine.reconcile_parked()?;

        let counts = engine.queue.counts();
        tracing::info!(
            pending = counts.outstanding(),
            dead_letter = counts.dead_letter,
            conflicts = engine.conflicts.unresolved().len(),
            "sync engine opened"
        );
        Ok(engine)
    }
}

impl<S: KvStore, R: RemoteApi> SyncEngine<S, R> {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn notify_online(&self) -> bool {
        self.monitor.notify_online()
    }

    pub fn notify_offline(&self) -> bool {
        self.monitor.notify_offline()
    }

    /// Asks the worker to run a cycle.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn wake_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Token cancelled when the engine is shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn wake_if_online(&self) {
        if self.monitor.is_online() {
            self.wake();
        }
    }

    /// Time until the earliest scheduled retry falls due. `None` while
    /// offline or when no retry is waiting.
    pub fn next_retry_delay(&self) -> Option<Duration> {
        if !self.monitor.is_online() {
            return None;
        }
        let at = self.queue.next_retry_at()?;
        Some((at - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Durably queues a local write and returns its operation id.
    ///
    /// The base version is, in order: the one given, none when an earlier
    /// write to the entity is still unsettled (the operation is chained and
    /// rebased later), or the last remote version seen for the entity,
    /// even if its cache entry has expired.
    pub fn enqueue_mutation(&self, mutation: Mutation) -> Result<OperationId> {
        let Mutation { operation_id, kind, entity, payload, base_version } = mutation;
        let chained = !self.queue.pending_for(&entity).is_empty();
        // Expiry only limits reads; the last seen version is still a valid base
        let cached = self.cache.last_known(&entity);

        let (base_version, base_value) = match base_version {
            Some(version) => {
                let value = cached.filter(|c| c.remote_version == version).map(|c| c.value);
                (Some(version), value)
            }
            None if kind == OperationKind::Create || chained => (None, None),
            None => match cached {
                Some(record) => (Some(record.remote_version), Some(record.value)),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "{kind} of {entity} requires a base version\n  hint: read the entity first so its version is cached"
                    )))
                }
            },
        };

        let id = operation_id.unwrap_or_else(OperationId::generate);
        let op = PendingOperation::new(id, kind, entity, payload, base_version, self.clock.now())
            .with_base_value(base_value);
        let id = self.queue.enqueue(op)?;

        tracing::debug!(op = %id, kind = %kind, chained, "mutation queued");
        self.wake_if_online();
        Ok(id)
    }

    /// The engine's view of an entity, with pending writes overlaid.
    pub fn get_cached_value(&self, entity: &EntityKey) -> CacheRead {
        overlay(self.cache.get(entity), &self.queue.pending_for(entity))
    }

    /// Like [`Self::get_cached_value`], fetching from the remote on a miss
    /// while online.
    pub async fn read_through(&self, entity: &EntityKey) -> Result<CacheRead> {
        let read = self.get_cached_value(entity);
        if read != CacheRead::Miss || !self.monitor.is_online() {
            return Ok(read);
        }

        let fetch = self.remote.fetch(entity.clone());
        let record = match tokio::time::timeout(self.config.request_timeout(), fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(RemoteError::Transient("fetch timed out".to_string()).into()),
        };

        if let Some(record) = record.filter(|r| !r.value.is_null()) {
            self.cache.put(entity.clone(), record.value, record.version, None);
        }
        Ok(self.get_cached_value(entity))
    }

    pub fn list_unresolved_conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.unresolved()
    }

    pub fn get_conflict(&self, id: &str) -> Option<ConflictRecord> {
        self.conflicts.get(id)
    }

    /// Settles a conflict by strategy or explicit value and applies the
    /// outcome: a corrective operation when the result differs from the
    /// remote, otherwise just a cache update.
    pub fn resolve_conflict(&self, id: &str, resolution: Resolution) -> Result<ConflictRecord> {
        let record = self.conflicts.resolve(id, resolution, self.clock.now())?;
        self.apply_resolution(&record)?;
        self.wake_if_online();
        Ok(record)
    }

    /// Puts a resolved conflict into effect and releases the parked operation.
    pub(crate) fn apply_resolution(&self, conflict: &ConflictRecord) -> Result<()> {
        let Some(resolved) = conflict.resolved_value.as_ref() else {
            return Err(Error::InvalidInput(format!("conflict {} is not resolved", conflict.id)));
        };
        let entity = &conflict.entity;
        self.cache_remote(entity, &conflict.remote_value, &conflict.remote_version);

        let original = self.queue.get(&conflict.operation_id);
        let needs_write = resolved != &conflict.remote_value;
        if needs_write {
            let (kind, payload) = corrective_patch(&conflict.remote_value, resolved);
            // Takes the original's place in line
            let created_at = original.as_ref().map_or_else(|| self.clock.now(), |op| op.created_at);
            let op = PendingOperation::new(
                OperationId::new(format!("{}-resolution", conflict.id)),
                kind,
                entity.clone(),
                payload,
                Some(conflict.remote_version.clone()),
                created_at,
            )
            .with_base_value(Some(conflict.remote_value.clone()));
            self.queue.enqueue(op)?;
        }

        let parked = original.filter(|op| {
            op.status == OperationStatus::InFlight
                && op.conflict_id.as_deref() == Some(conflict.id.as_str())
        });
        if let Some(op) = parked {
            self.queue.mark_completed(&op.id)?;
        }
        if !needs_write {
            self.queue.rebase_successor(
                entity,
                &conflict.remote_version,
                Some(&conflict.remote_value),
            )?;
        }

        tracing::info!(
            conflict = %conflict.id,
            entity = %entity,
            corrective = needs_write,
            "resolution applied"
        );
        Ok(())
    }

    /// Finishes or releases operations parked on conflicts.
    pub(crate) fn reconcile_parked(&self) -> Result<()> {
        for op in self.queue.awaiting_resolution() {
            let Some(conflict_id) = op.conflict_id.as_deref() else {
                continue;
            };
            match self.conflicts.get(conflict_id) {
                None => {
                    tracing::warn!(
                        op = %op.id,
                        conflict = conflict_id,
                        "conflict record missing, resending"
                    );
                    self.queue.unpark(&op.id)?;
                }
                Some(conflict) if conflict.is_resolved() => self.apply_resolution(&conflict)?,
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub(crate) fn cache_remote(&self, entity: &EntityKey, value: &Value, version: &Version) {
        if value.is_null() {
            self.cache.invalidate(entity);
        } else {
            self.cache.put(entity.clone(), value.clone(), version.clone(), None);
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            connectivity: self.monitor.current(),
            queue: self.queue.counts(),
            unresolved_conflicts: self.conflicts.unresolved().len(),
            cached_entries: self.cache.len(),
            syncing: self.gate.is_draining(),
        }
    }

    /// Number of operations not yet settled.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn operation(&self, id: &OperationId) -> Option<PendingOperation> {
        self.queue.get(id)
    }

    pub fn dead_letters(&self) -> Vec<PendingOperation> {
        self.queue.dead_letters()
    }

    /// Queue records that could not be decoded, counted among dead letters.
    pub fn corrupt_records(&self) -> Vec<CorruptRecord> {
        self.queue.corrupt_records()
    }

    /// Gives a dead letter a fresh attempt budget.
    pub fn retry_dead_letter(&self, id: &OperationId) -> Result<PendingOperation> {
        let op = self.queue.requeue_dead_letter(id)?;
        tracing::info!(op = %id, "dead letter requeued");
        self.wake_if_online();
        Ok(op)
    }

    /// Drops expired cache entries and settled history past retention.
    pub fn sweep(&self) -> Result<SweepReport> {
        let cutoff = sub_duration(self.clock.now(), self.config.completed_retention());
        let report = SweepReport {
            expired_cache_entries: self.cache.sweep_expired(),
            pruned_operations: self.queue.prune(cutoff)?,
            pruned_conflicts: self.conflicts.prune(cutoff)?,
        };
        if report != SweepReport::default() {
            tracing::debug!(?report, "sweep finished");
        }
        Ok(report)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
