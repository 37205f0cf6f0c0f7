// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! offsync-core: offline-first sync engine
//!
//! This crate provides the durable operation queue, connectivity monitor,
//! sync dispatcher, conflict resolver and read-through cache used by the
//! offsyncd daemon or any embedding application.

pub mod cache;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod op;
pub mod protocol;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod store;
pub mod worker;

pub use cache::{CacheRead, CachedRecord, ReadThroughCache};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use conflict::{
    ConflictRecord, ConflictResolver, ConflictStatus, RemoteRecord, Resolution, Strategy,
};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use dispatcher::CycleReport;
pub use engine::{EngineStatus, Mutation, SweepReport, SyncEngine};
pub use error::{Error, Result};
pub use op::{
    EntityKey, FailureKind, OperationId, OperationKind, OperationStatus, PendingOperation, Version,
};
pub use queue::{CorruptRecord, OperationQueue, QueueCounts};
pub use remote::{ApplyOutcome, ApplyRequest, FetchResult, RemoteApi, RemoteError, RemoteFuture};
pub use retry::RetryPolicy;
pub use store::{KvStore, MemoryStore, SqliteStore};
pub use worker::SyncWorker;

#[cfg(test)]
mod test_helpers;
