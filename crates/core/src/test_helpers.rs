// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::clock::{from_millis, ClockSource, ManualClock};
use crate::config::EngineConfig;
use crate::conflict::{apply_local, ConflictRecord, ConflictStatus, RemoteRecord};
use crate::engine::SyncEngine;
use crate::remote::{ApplyOutcome, ApplyRequest, FetchResult, RemoteApi, RemoteFuture};
use crate::error::{Error, Result};
use crate::op::{EntityKey, OperationId, OperationKind, PendingOperation, Version};
use crate::store::{KvStore, MemoryStore};

/// Create a `Create` operation for `posts/<key>` at the given wall time.
pub fn make_create(id: &str, key: &str, created_ms: u64) -> PendingOperation {
    PendingOperation::new(
        OperationId::new(id),
        OperationKind::Create,
        EntityKey::new("posts", key),
        json!({ "text": format!("post {key}") }),
        None,
        from_millis(created_ms),
    )
}

/// Create an `Update` operation for `posts/<key>` against `base`.
pub fn make_update(
    id: &str,
    key: &str,
    patch: Value,
    base: &str,
    created_ms: u64,
) -> PendingOperation {
    PendingOperation::new(
        OperationId::new(id),
        OperationKind::Update,
        EntityKey::new("posts", key),
        patch,
        Some(Version::from(base)),
        from_millis(created_ms),
    )
}

/// A store whose writes can be switched off to simulate disk failure.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk unavailable")));
        }
        Ok(())
    }
}

impl KvStore for FlakyStore {
    fn put(&self, ns: &str, key: &str, value: &[u8]) -> Result<()> {
        self.check()?;
        self.inner.put(ns, key, value)
    }

    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(ns, key)
    }

    fn delete(&self, ns: &str, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(ns, key)
    }

    fn scan(&self, ns: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner.scan(ns)
    }
}

/// Build an unresolved conflict on `posts/1` directly.
///
/// Local writes at `local_ms`; the remote reports `remote_ms` when given.
pub fn make_conflict(
    kind: OperationKind,
    local: Value,
    base: Option<Value>,
    remote: Value,
    local_ms: u64,
    remote_ms: Option<u64>,
) -> ConflictRecord {
    ConflictRecord {
        id: format!("c-{local_ms}"),
        entity: EntityKey::new("posts", "1"),
        operation_id: OperationId::new(format!("op-{local_ms}")),
        kind,
        local_value: local,
        local_base_version: Some(Version::from("v1")),
        local_written_at: from_millis(local_ms),
        base_value: base,
        remote_value: remote,
        remote_version: Version::from("v2"),
        remote_modified_at: remote_ms.map(from_millis),
        detected_at: from_millis(local_ms.max(remote_ms.unwrap_or(0)) + 1),
        status: ConflictStatus::Unresolved,
        strategy_used: None,
        resolved_value: None,
        resolved_at: None,
        discarded_value: None,
    }
}

/// A remote that answers from a script, falling back to accepting writes.
///
/// Tracks which entities have a request outstanding so tests can check that
/// no entity is ever dispatched twice at once.
#[derive(Default)]
pub struct ScriptedRemote {
    script: Mutex<VecDeque<ApplyOutcome>>,
    requests: Mutex<Vec<ApplyRequest>>,
    records: Mutex<HashMap<EntityKey, RemoteRecord>>,
    delay: Mutex<Option<Duration>>,
    active: Mutex<HashSet<EntityKey>>,
    overlap: AtomicBool,
    versions: AtomicU64,
}

impl ScriptedRemote {
    /// Queues the outcome of the next unscripted request.
    pub fn push(&self, outcome: ApplyOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_record(&self, entity: EntityKey, record: RemoteRecord) {
        self.records.lock().unwrap().insert(entity, record);
    }

    pub fn record(&self, entity: &EntityKey) -> Option<RemoteRecord> {
        self.records.lock().unwrap().get(entity).cloned()
    }

    pub fn requests(&self) -> Vec<ApplyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_ids(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.operation_id.to_string()).collect()
    }

    /// True if two requests for one entity were ever outstanding together.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    fn accept(&self, request: &ApplyRequest) -> ApplyOutcome {
        let entity = request.entity();
        let mut records = self.records.lock().unwrap();
        let current = records.get(&entity).map_or(Value::Null, |r| r.value.clone());
        let value = apply_local(request.kind, &request.payload, &current);
        let next = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let version = Version::new(format!("v{next}"));
        let record =
            RemoteRecord { value: value.clone(), version: version.clone(), modified_at: None };
        records.insert(entity, record);
        ApplyOutcome::Applied { value, version, modified_at: None }
    }
}

impl RemoteApi for ScriptedRemote {
    fn apply_operation(&self, request: ApplyRequest) -> RemoteFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            let entity = request.entity();
            if !self.active.lock().unwrap().insert(entity.clone()) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            self.requests.lock().unwrap().push(request.clone());

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.active.lock().unwrap().remove(&entity);

            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| self.accept(&request))
        })
    }

    fn fetch(&self, entity: EntityKey) -> RemoteFuture<'_, FetchResult> {
        Box::pin(async move { Ok(self.record(&entity)) })
    }
}

pub type TestEngine = SyncEngine<Arc<MemoryStore>, Arc<ScriptedRemote>>;

/// Small config with deterministic backoff.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        backoff_jitter: 0.0,
        initial_backoff_ms: 100,
        max_attempts: 3,
        ..EngineConfig::default()
    }
}

/// An engine over a fresh memory store and a clock at t=1000ms.
pub fn test_engine(
    config: EngineConfig,
) -> (Arc<TestEngine>, Arc<ScriptedRemote>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let (engine, remote, clock) = test_engine_on(store, config);
    (engine, remote, clock)
}

/// An engine over an existing store.
pub fn test_engine_on(
    store: Arc<MemoryStore>,
    config: EngineConfig,
) -> (Arc<TestEngine>, Arc<ScriptedRemote>, Arc<ManualClock>) {
    let remote = Arc::new(ScriptedRemote::default());
    let clock = Arc::new(ManualClock::new(1000));
    let engine = SyncEngine::open(
        store,
        Arc::clone(&remote),
        Arc::clone(&clock) as Arc<dyn ClockSource>,
        config,
    )
    .unwrap();
    (Arc::new(engine), remote, clock)
}
