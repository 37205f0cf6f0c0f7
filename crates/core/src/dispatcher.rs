// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync cycles: draining the queue against the remote.
//!
//! A cycle fetches a batch of eligible operations, claims each one
//! (`InFlight`) before any request goes out, then sends them with bounded
//! concurrency. Every outcome is settled as soon as it arrives:
//!
//! - applied: completed, canonical value cached
//! - conflict: detected, recorded, auto-resolved by policy or parked
//! - transient failure or timeout: retried with backoff
//! - validation failure: dead-lettered
//!
//! Batches repeat until nothing is eligible, the engine goes offline, shutdown
//! starts, or the per-cycle batch limit is hit.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::conflict::RemoteRecord;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::op::{PendingOperation, Version};
use crate::queue::FailOutcome;
use crate::remote::{ApplyOutcome, ApplyRequest, RemoteApi, RemoteError};
use crate::store::KvStore;

/// Gate admitting one draining cycle at a time.
///
/// Wake-ups that arrive while a cycle is draining are coalesced into a single
/// re-run of that cycle.
#[derive(Debug, Default)]
pub struct SingleFlight {
    draining: AtomicBool,
    rerun: AtomicBool,
}

impl SingleFlight {
    /// Enters the gate, or records a re-run request if it is taken.
    pub fn try_enter(&self) -> Option<FlightGuard<'_>> {
        let entered =
            self.draining.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
        if entered.is_ok() {
            Some(FlightGuard { gate: self })
        } else {
            self.rerun.store(true, Ordering::Release);
            None
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Consumes a re-run request left after the gate was released.
    fn take_rerun(&self) -> bool {
        self.rerun.swap(false, Ordering::AcqRel)
    }
}

/// Holds the gate; releases it on drop.
pub struct FlightGuard<'a> {
    gate: &'a SingleFlight,
}

impl FlightGuard<'_> {
    /// Returns true (once) if someone asked for another pass.
    pub fn take_rerun(&self) -> bool {
        self.gate.take_rerun()
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.draining.store(false, Ordering::Release);
    }
}

/// What one call to [`SyncEngine::run_cycle`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CycleReport {
    /// The gate was taken; this call only requested a re-run.
    pub coalesced: bool,
    pub batches: usize,
    pub dispatched: usize,
    pub completed: usize,
    /// Rejected with a conflict that turned out to be no real difference.
    pub reconciled: usize,
    pub conflicts: usize,
    pub auto_resolved: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl<S: KvStore, R: RemoteApi> SyncEngine<S, R> {
    /// Runs one sync cycle, or coalesces into the one already running.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        loop {
            let Some(guard) = self.gate.try_enter() else {
                tracing::debug!("sync cycle already draining, coalesced");
                report.coalesced = report.batches == 0;
                return report;
            };
            loop {
                self.drain(&mut report).await;
                if !guard.take_rerun() {
                    break;
                }
            }
            drop(guard);
            // A wake may have landed between the last check and the release
            if !self.gate.take_rerun() {
                break;
            }
        }

        if report.dispatched > 0 {
            tracing::info!(
                batches = report.batches,
                dispatched = report.dispatched,
                completed = report.completed,
                conflicts = report.conflicts,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "sync cycle finished"
            );
        }
        report
    }

    async fn drain(&self, report: &mut CycleReport) {
        if let Err(e) = self.reconcile_parked() {
            tracing::error!(error = %e, "failed to reconcile parked operations");
        }

        for _ in 0..self.config.max_batches_per_cycle {
            if !self.monitor.is_online() {
                tracing::debug!("offline, not starting another batch");
                break;
            }
            if self.is_shutting_down() {
                break;
            }

            let now = self.clock.now();
            let batch = self.queue.list_pending(self.config.batch_size, now);
            if batch.is_empty() {
                break;
            }

            // Claim everything before fan-out so no entity can be dispatched twice
            let mut claimed = Vec::with_capacity(batch.len());
            for op in batch {
                match self.queue.mark_in_flight(&op.id, now) {
                    Ok(op) => claimed.push(op),
                    Err(e) => tracing::error!(op = %op.id, error = %e, "failed to claim operation"),
                }
            }
            if claimed.is_empty() {
                break;
            }
            report.batches += 1;
            report.dispatched += claimed.len();

            let mut results = stream::iter(claimed)
                .map(|op| async move {
                    let outcome = self.send(&op).await;
                    (op, outcome)
                })
                .buffer_unordered(self.config.fan_out);

            while let Some((op, outcome)) = results.next().await {
                if let Err(e) = self.settle(&op, outcome, report) {
                    tracing::error!(op = %op.id, error = %e, "failed to record outcome");
                    self.queue.release(&op.id);
                }
            }
        }
    }

    async fn send(&self, op: &PendingOperation) -> ApplyOutcome {
        tracing::debug!(
            op = %op.id,
            entity = %op.entity(),
            kind = %op.kind,
            attempt = op.attempts + 1,
            "sending"
        );
        let request = self.remote.apply_operation(ApplyRequest::from(op));
        match tokio::time::timeout(self.config.request_timeout(), request).await {
            Ok(outcome) => outcome,
            Err(_) => ApplyOutcome::Failed(RemoteError::Transient(format!(
                "request timed out after {}s",
                self.config.request_timeout_secs
            ))),
        }
    }

    fn settle(
        &self,
        op: &PendingOperation,
        outcome: ApplyOutcome,
        report: &mut CycleReport,
    ) -> Result<()> {
        let now = self.clock.now();
        match outcome {
            ApplyOutcome::Applied { value, version, .. } => {
                self.settle_applied(op, &value, &version)?;
                report.completed += 1;
            }
            ApplyOutcome::Conflict(remote) => self.settle_conflict(op, remote, now, report)?,
            ApplyOutcome::Failed(err) => self.settle_failure(op, &err, now, report)?,
        }
        Ok(())
    }

    fn settle_applied(
        &self,
        op: &PendingOperation,
        value: &Value,
        version: &Version,
    ) -> Result<()> {
        self.queue.mark_completed(&op.id)?;
        let entity = op.entity();
        self.cache_remote(&entity, value, version);
        self.queue.rebase_successor(&entity, version, Some(value))?;
        tracing::debug!(op = %op.id, version = %version, "operation applied");
        Ok(())
    }

    fn settle_conflict(
        &self,
        op: &PendingOperation,
        remote: RemoteRecord,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        if op.base_version.as_ref() == Some(&remote.version) {
            // The remote contradicts itself; try again later rather than drop the write
            let err = RemoteError::Transient(format!(
                "conflict reported at base version {}",
                remote.version
            ));
            return self.settle_failure(op, &err, now, report);
        }

        let Some(conflict) = self.conflicts.detect(op, &remote, now) else {
            tracing::debug!(op = %op.id, "stale base but same outcome, reconciled");
            self.settle_applied(op, &remote.value, &remote.version)?;
            report.reconciled += 1;
            return Ok(());
        };

        let conflict_id = conflict.id.clone();
        self.queue.mark_awaiting_resolution(&op.id, &conflict_id)?;
        if let Err(e) = self.conflicts.record(conflict) {
            self.queue.unpark(&op.id)?;
            return Err(e);
        }
        report.conflicts += 1;
        self.cache_remote(&op.entity(), &remote.value, &remote.version);

        match self.conflicts.auto_resolve(&conflict_id, now)? {
            Some(resolved) => {
                self.apply_resolution(&resolved)?;
                report.auto_resolved += 1;
            }
            None => {
                tracing::info!(
                    op = %op.id,
                    conflict = %conflict_id,
                    "conflict awaits manual resolution"
                );
            }
        }
        Ok(())
    }

    fn settle_failure(
        &self,
        op: &PendingOperation,
        err: &RemoteError,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        match self.queue.mark_failed(&op.id, err.failure_kind(), &err.to_string(), now)? {
            FailOutcome::Retry { attempts, delay, .. } => {
                report.retried += 1;
                tracing::warn!(
                    op = %op.id,
                    attempts,
                    ?delay,
                    error = %err,
                    "operation failed, retry scheduled"
                );
            }
            FailOutcome::DeadLettered { attempts } => {
                report.dead_lettered += 1;
                tracing::warn!(op = %op.id, attempts, error = %err, "operation dead-lettered");
                // The remote never changed; successors build on the same base
                if let Some(version) = &op.base_version {
                    self.queue.rebase_successor(&op.entity(), version, op.base_value.as_ref())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
