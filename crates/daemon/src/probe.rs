// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat connectivity probe.
//!
//! Pings the remote on an interval and feeds the result into the engine's
//! connectivity monitor, which debounces online transitions and wakes the
//! sync worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use offsync_core::{KvStore, RemoteApi, RemoteFuture, SyncEngine};

/// Result of one heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Beat {
    Alive,
    /// The connection is busy with a request; no new information.
    Busy,
    Dead(String),
}

/// Something that can tell whether the remote is reachable.
pub trait Heartbeat: Send + Sync {
    fn beat(&self) -> RemoteFuture<'_, Beat>;
}

impl<T: Heartbeat + ?Sized> Heartbeat for Arc<T> {
    fn beat(&self) -> RemoteFuture<'_, Beat> {
        (**self).beat()
    }
}

/// Spawns the probe loop. It stops when `cancel` fires.
pub fn spawn<H, S, R>(
    heartbeat: H,
    engine: Arc<SyncEngine<S, R>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    H: Heartbeat + 'static,
    S: KvStore + 'static,
    R: RemoteApi + 'static,
{
    tokio::spawn(async move { run(&heartbeat, &engine, interval, cancel).await })
}

async fn run<H: Heartbeat, S: KvStore, R: RemoteApi>(
    heartbeat: &H,
    engine: &SyncEngine<S, R>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let beat = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            beat = heartbeat.beat() => beat,
        };
        apply(engine, &beat);
    }
    tracing::debug!("connectivity probe stopped");
}

/// Feeds one heartbeat result into the engine.
pub(crate) fn apply<S: KvStore, R: RemoteApi>(engine: &SyncEngine<S, R>, beat: &Beat) {
    match beat {
        Beat::Alive => {
            engine.notify_online();
        }
        Beat::Dead(reason) => {
            if engine.notify_offline() {
                tracing::warn!(%reason, "remote unreachable");
            }
        }
        Beat::Busy => {}
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
