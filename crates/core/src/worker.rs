// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Background task that drives sync cycles and maintenance.
//!
//! One tokio task waits on, in priority order:
//! - cancellation (shutdown)
//! - dispatcher wake (online event, enqueue while online, manual sync)
//! - the earliest scheduled retry falling due
//! - the safety-net timer, which covers any missed wake
//! - the sweep timer (cache expiry, pruning of settled history)

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::engine::SyncEngine;
use crate::remote::RemoteApi;
use crate::store::KvStore;

/// Floor on the wait for a due retry, so a retry held back by a cycle that
/// is still draining does not spin.
const MIN_RETRY_WAIT: Duration = Duration::from_millis(10);

/// Handle to the running sync task.
pub struct SyncWorker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl SyncWorker {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<S, R>(engine: Arc<SyncEngine<S, R>>) -> Self
    where
        S: KvStore + 'static,
        R: RemoteApi + 'static,
    {
        let cancel = engine.shutdown_token();
        let handle = tokio::spawn(run(engine, cancel.clone()));
        SyncWorker { handle, cancel }
    }

    /// Stops the worker.
    ///
    /// No new batches start once cancelled; requests already in flight get up
    /// to `grace` to finish before the task is aborted. Returns false if it
    /// had to be aborted.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(?grace, "sync worker did not stop in time, aborting");
                self.handle.abort();
                false
            }
        }
    }
}

async fn run<S, R>(engine: Arc<SyncEngine<S, R>>, cancel: CancellationToken)
where
    S: KvStore,
    R: RemoteApi,
{
    let wake = engine.wake_signal();

    let mut safety_net = tokio::time::interval(engine.config().safety_net_interval());
    safety_net.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval(engine.config().sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing to sweep at startup
    sweep.tick().await;

    tracing::info!("sync worker started");
    loop {
        let retry_at =
            engine.next_retry_delay().map(|delay| Instant::now() + delay.max(MIN_RETRY_WAIT));

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = wake.notified() => {
                engine.run_cycle().await;
            }

            _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                engine.run_cycle().await;
            }

            _ = safety_net.tick() => {
                if engine.connectivity().is_online() {
                    engine.run_cycle().await;
                }
            }

            _ = sweep.tick() => {
                if let Err(e) = engine.sweep() {
                    tracing::error!(error = %e, "sweep failed");
                }
            }
        }
    }
    tracing::info!("sync worker stopped");
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
