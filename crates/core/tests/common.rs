// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

// Allow unused items: helpers are shared across test binaries,
// and not every test file uses every helper.
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

pub use offsync_core::conflict::apply_local;
pub use offsync_core::{
    ApplyOutcome, ApplyRequest, CacheRead, ClockSource, EngineConfig, EntityKey, FetchResult,
    ManualClock, MemoryStore, Mutation, OperationId, OperationKind, RemoteApi, RemoteError,
    RemoteFuture, RemoteRecord, Resolution, SqliteStore, Strategy, SyncEngine, Version,
};

/// An in-memory server that enforces base-version preconditions and
/// remembers outcomes by operation id.
#[derive(Default)]
pub struct VersionedRemote {
    records: Mutex<HashMap<EntityKey, RemoteRecord>>,
    outcomes: Mutex<HashMap<OperationId, ApplyOutcome>>,
    applied: Mutex<Vec<OperationId>>,
    failures: Mutex<VecDeque<RemoteError>>,
    next_version: AtomicU64,
    delay: Mutex<Option<Duration>>,
    hang: AtomicBool,
}

impl VersionedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(VersionedRemote::default())
    }

    /// Writes a record directly, as another client would.
    pub fn server_write(&self, entity: &EntityKey, value: Value) -> Version {
        let version = self.bump();
        let record = RemoteRecord { value, version: version.clone(), modified_at: None };
        self.records.lock().unwrap().insert(entity.clone(), record);
        version
    }

    pub fn value(&self, entity: &EntityKey) -> Option<Value> {
        self.records.lock().unwrap().get(entity).map(|r| r.value.clone())
    }

    pub fn version(&self, entity: &EntityKey) -> Option<Version> {
        self.records.lock().unwrap().get(entity).map(|r| r.version.clone())
    }

    /// Operation ids in the order they were first applied.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().iter().map(|id| id.as_str().to_string()).collect()
    }

    /// Fails the next `n` requests with a transient error.
    pub fn fail_next(&self, n: usize) {
        let mut failures = self.failures.lock().unwrap();
        for i in 0..n {
            failures.push_back(RemoteError::Transient(format!("503 service unavailable ({i})")));
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes every request wait forever.
    pub fn hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }

    fn bump(&self) -> Version {
        Version::new(format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn apply(&self, request: &ApplyRequest) -> ApplyOutcome {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return ApplyOutcome::Failed(err);
        }
        if let Some(done) = self.outcomes.lock().unwrap().get(&request.operation_id) {
            return done.clone();
        }

        let entity = request.entity();
        let mut records = self.records.lock().unwrap();
        let current = records.get(&entity).cloned();
        let exists = current.as_ref().is_some_and(|r| !r.value.is_null());

        if let Some(record) = &current {
            let stale = match &request.base_version {
                Some(base) => record.version != *base,
                None => exists,
            };
            if stale {
                return ApplyOutcome::Conflict(record.clone());
            }
        }
        if !exists && request.kind != OperationKind::Create {
            let reason = format!("{entity} does not exist");
            return ApplyOutcome::Failed(RemoteError::Validation(reason));
        }

        let onto = current.map(|r| r.value).unwrap_or(Value::Null);
        let value = apply_local(request.kind, &request.payload, &onto);
        let version = self.bump();
        let record =
            RemoteRecord { value: value.clone(), version: version.clone(), modified_at: None };
        records.insert(entity, record);

        let outcome = ApplyOutcome::Applied { value, version, modified_at: None };
        self.outcomes.lock().unwrap().insert(request.operation_id.clone(), outcome.clone());
        self.applied.lock().unwrap().push(request.operation_id.clone());
        outcome
    }
}

impl RemoteApi for VersionedRemote {
    fn apply_operation(&self, request: ApplyRequest) -> RemoteFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.apply(&request)
        })
    }

    fn fetch(&self, entity: EntityKey) -> RemoteFuture<'_, FetchResult> {
        Box::pin(async move { Ok(self.records.lock().unwrap().get(&entity).cloned()) })
    }
}

pub type MemEngine = SyncEngine<Arc<MemoryStore>, Arc<VersionedRemote>>;

pub fn config() -> EngineConfig {
    EngineConfig {
        backoff_jitter: 0.0,
        initial_backoff_ms: 100,
        max_attempts: 3,
        fan_out: 1,
        ..EngineConfig::default()
    }
}

pub fn engine(config: EngineConfig) -> (MemEngine, Arc<VersionedRemote>, Arc<ManualClock>) {
    let remote = VersionedRemote::new();
    let clock = Arc::new(ManualClock::new(1_000_000));
    let engine = SyncEngine::open(
        Arc::new(MemoryStore::new()),
        Arc::clone(&remote),
        Arc::clone(&clock) as Arc<dyn ClockSource>,
        config,
    )
    .unwrap();
    (engine, remote, clock)
}

pub fn post(key: &str) -> EntityKey {
    EntityKey::new("posts", key)
}
