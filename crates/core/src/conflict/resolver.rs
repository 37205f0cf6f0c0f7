// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable conflict log and resolution entry point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::merge::{field_merge, last_writer_wins, Merged};
use super::{detect, ConflictRecord, ConflictStatus, RemoteRecord, Resolution, Strategy};
use crate::error::{Error, Result};
use crate::op::PendingOperation;
use crate::store::KvStore;

/// Namespace holding conflict records.
pub const CONFLICTS_NS: &str = "conflicts";

/// Records conflicts and settles them by policy or by caller choice.
pub struct ConflictResolver<S: KvStore> {
    store: S,
    default_policy: Strategy,
    policies: HashMap<String, Strategy>,
    records: Mutex<Vec<ConflictRecord>>,
}

impl<S: KvStore> ConflictResolver<S> {
    /// Loads persisted conflicts. Records that fail to decode are logged and
    /// skipped.
    pub fn open(
        store: S,
        default_policy: Strategy,
        policies: HashMap<String, Strategy>,
    ) -> Result<Self> {
        let mut records = Vec::new();
        for (key, bytes) in store.scan(CONFLICTS_NS)? {
            match serde_json::from_slice::<ConflictRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "skipping corrupt conflict record")
                }
            }
        }
        records.sort_by_key(|r| r.detected_at);

        Ok(ConflictResolver { store, default_policy, policies, records: Mutex::new(records) })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConflictRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, record: &ConflictRecord) -> Result<()> {
        self.store.put(CONFLICTS_NS, &record.id, &serde_json::to_vec(record)?)
    }

    /// Policy configured for a collection.
    pub fn policy_for(&self, collection: &str) -> Strategy {
        self.policies.get(collection).copied().unwrap_or(self.default_policy)
    }

    /// See [`super::detect`].
    pub fn detect(
        &self,
        op: &PendingOperation,
        remote: &RemoteRecord,
        now: DateTime<Utc>,
    ) -> Option<ConflictRecord> {
        detect(op, remote, now)
    }

    /// Durably adds a newly detected conflict.
    pub fn record(&self, conflict: ConflictRecord) -> Result<()> {
        let mut records = self.lock();
        if records.iter().any(|r| r.id == conflict.id) {
            return Ok(());
        }
        self.persist(&conflict)?;
        tracing::info!(
            conflict = %conflict.id,
            entity = %conflict.entity,
            op = %conflict.operation_id,
            "conflict recorded"
        );
        records.push(conflict);
        Ok(())
    }

    /// Applies the collection policy to an unresolved conflict.
    ///
    /// Returns the resolved record, or `None` when the conflict must wait for
    /// a manual decision.
    pub fn auto_resolve(&self, id: &str, now: DateTime<Utc>) -> Result<Option<ConflictRecord>> {
        self.settle(id, now, |record| {
            let merged = match self.policy_for(&record.entity.collection) {
                Strategy::Manual => None,
                Strategy::LastWriterWins => Some(last_writer_wins(record)),
                Strategy::FieldMerge => {
                    let merged = field_merge(record);
                    if merged.is_none() {
                        tracing::info!(
                            conflict = %record.id,
                            "incompatible field types, deferring to manual"
                        );
                    }
                    merged
                }
            };
            Ok(merged)
        })
    }

    /// Settles a conflict with a caller-chosen strategy or explicit value.
    pub fn resolve(
        &self,
        id: &str,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<ConflictRecord> {
        let resolved = self.settle(id, now, |record| match resolution {
            Resolution::Value(value) => {
                Ok(Some(Merged { value, strategy: Strategy::Manual, discarded: None }))
            }
            Resolution::Strategy(Strategy::LastWriterWins) => Ok(Some(last_writer_wins(record))),
            Resolution::Strategy(Strategy::FieldMerge) => {
                field_merge(record).map(Some).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "conflict {id} has incompatible field types; supply a value"
                    ))
                })
            }
            Resolution::Strategy(Strategy::Manual) => {
                Err(Error::InvalidInput("manual resolution requires an explicit value".to_string()))
            }
        })?;
        resolved.ok_or_else(|| Error::ConflictNotFound(id.to_string()))
    }

    fn settle<F>(&self, id: &str, now: DateTime<Utc>, decide: F) -> Result<Option<ConflictRecord>>
    where
        F: FnOnce(&ConflictRecord) -> Result<Option<Merged>>,
    {
        let mut records = self.lock();
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))?;
        if records[index].is_resolved() {
            return Err(Error::ConflictAlreadyResolved(id.to_string()));
        }

        let Some(merged) = decide(&records[index])? else {
            return Ok(None);
        };

        let mut updated = records[index].clone();
        updated.status = ConflictStatus::Resolved;
        updated.strategy_used = Some(merged.strategy);
        updated.resolved_value = Some(merged.value);
        updated.discarded_value = merged.discarded;
        updated.resolved_at = Some(now);
        self.persist(&updated)?;

        tracing::info!(conflict = %updated.id, strategy = %merged.strategy, "conflict resolved");
        records[index] = updated.clone();
        Ok(Some(updated))
    }

    pub fn get(&self, id: &str) -> Option<ConflictRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Unresolved conflicts in detection order.
    pub fn unresolved(&self) -> Vec<ConflictRecord> {
        self.lock().iter().filter(|r| !r.is_resolved()).cloned().collect()
    }

    /// Deletes resolved conflicts settled before `older_than`.
    pub fn prune(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut records = self.lock();
        let stale: Vec<String> = records
            .iter()
            .filter(|r| r.resolved_at.is_some_and(|at| at < older_than))
            .map(|r| r.id.clone())
            .collect();
        for id in &stale {
            self.store.delete(CONFLICTS_NS, id)?;
            records.retain(|r| &r.id != id);
        }
        Ok(stale.len())
    }
}
