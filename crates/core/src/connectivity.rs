// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Edge-triggered connectivity state.
//!
//! Signal sources (an OS reachability hook, a heartbeat probe, a test) call
//! [`ConnectivityMonitor::notify_online`] and
//! [`ConnectivityMonitor::notify_offline`]. The state always tracks the latest
//! signal, but at most one online *event* (callbacks plus dispatcher wake) is
//! emitted per debounce window, so a flapping link cannot trigger a sync storm.
//! Going offline never interrupts calls already in progress.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};

use crate::clock::ClockSource;

/// Reachability of the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

type TransitionCallback = Box<dyn Fn(Connectivity) + Send + Sync>;

/// Tracks connectivity and fans transitions out to listeners.
pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    debounce: Duration,
    clock: Arc<dyn ClockSource>,
    /// Time of the last emitted online event, in epoch ms.
    last_online_event: Mutex<Option<u64>>,
    callbacks: Mutex<Vec<TransitionCallback>>,
    wake: Arc<Notify>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in `initial` state. Online events notify `wake`.
    pub fn new(
        initial: Connectivity,
        debounce: Duration,
        clock: Arc<dyn ClockSource>,
        wake: Arc<Notify>,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        ConnectivityMonitor {
            state,
            debounce,
            clock,
            last_online_event: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            wake,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow() == Connectivity::Online
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// Registers a callback for emitted transitions.
    ///
    /// Callbacks run on the signalling thread and must not block.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).push(Box::new(callback));
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Records that the remote is reachable.
    ///
    /// Returns true if an online event was emitted, false if the monitor was
    /// already online or the event fell inside the debounce window.
    pub fn notify_online(&self) -> bool {
        let previous = self.state.send_replace(Connectivity::Online);
        if previous == Connectivity::Online {
            return false;
        }

        let now = self.clock.now_ms();
        {
            let mut last = self.last_online_event.lock().unwrap_or_else(|e| e.into_inner());
            let debounce_ms = u64::try_from(self.debounce.as_millis()).unwrap_or(u64::MAX);
            if let Some(at) = *last {
                if now.saturating_sub(at) < debounce_ms {
                    tracing::debug!("online event suppressed by debounce");
                    return false;
                }
            }
            *last = Some(now);
        }

        tracing::info!("connectivity: online");
        self.emit(Connectivity::Online);
        self.wake.notify_one();
        true
    }

    /// Records that the remote is unreachable.
    pub fn notify_offline(&self) -> bool {
        let previous = self.state.send_replace(Connectivity::Offline);
        if previous == Connectivity::Offline {
            return false;
        }
        tracing::info!("connectivity: offline");
        self.emit(Connectivity::Offline);
        true
    }

    fn emit(&self, state: Connectivity) {
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback(state);
        }
    }
}

#[cfg(test)]
#[path = "connectivity_tests.rs"]
mod tests;
