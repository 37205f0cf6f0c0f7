// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use serde_json::json;

use super::*;
use crate::conflict::{RemoteRecord, Strategy};
use crate::remote::ApplyOutcome;
use crate::store::MemoryStore;
use crate::test_helpers::{test_config, test_engine, test_engine_on};

fn post(key: &str) -> EntityKey {
    EntityKey::new("posts", key)
}

fn manual_config() -> EngineConfig {
    EngineConfig { default_merge_policy: Strategy::Manual, ..test_config() }
}

#[tokio::test]
async fn create_offline_then_sync_online() {
    let (engine, remote, _) = test_engine(test_config());

    engine.enqueue_mutation(Mutation::create(post("1"), json!({"text": "hello"}))).unwrap();
    assert_eq!(engine.queue_len(), 1);
    assert!(engine.get_cached_value(&post("1")).is_pending());

    engine.notify_online();
    let report = engine.run_cycle().await;
    assert_eq!(report.completed, 1);
    assert_eq!(engine.queue_len(), 0);

    let server = remote.record(&post("1")).unwrap();
    match engine.get_cached_value(&post("1")) {
        CacheRead::Fresh { record } => {
            assert_eq!(record.value, json!({"text": "hello"}));
            assert_eq!(record.remote_version, server.version);
        }
        other => panic!("expected fresh read, got {other:?}"),
    }
}

#[test]
fn update_without_known_version_is_rejected() {
    let (engine, _, _) = test_engine(test_config());
    let err =
        engine.enqueue_mutation(Mutation::update(post("1"), json!({"text": "x"}))).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(engine.queue_len(), 0);
}

#[test]
fn update_takes_base_from_cache() {
    let (engine, _, _) = test_engine(test_config());
    engine.cache.put(post("1"), json!({"text": "old"}), Version::from("v7"), None);

    let id = engine.enqueue_mutation(Mutation::update(post("1"), json!({"text": "new"}))).unwrap();
    let op = engine.operation(&id).unwrap();
    assert_eq!(op.base_version, Some(Version::from("v7")));
    assert_eq!(op.base_value, Some(json!({"text": "old"})));
}

#[test]
fn write_behind_unsettled_sibling_is_chained() {
    let (engine, _, _) = test_engine(test_config());
    engine.cache.put(post("1"), json!({"text": "old"}), Version::from("v7"), None);
    engine.enqueue_mutation(Mutation::update(post("1"), json!({"text": "a"}))).unwrap();

    let id = engine.enqueue_mutation(Mutation::update(post("1"), json!({"text": "b"}))).unwrap();
    assert!(engine.operation(&id).unwrap().is_chained());
    assert_eq!(engine.get_cached_value(&post("1")).value(), Some(&json!({"text": "b"})));
}

#[test]
fn explicit_id_makes_enqueue_idempotent() {
    let (engine, _, _) = test_engine(test_config());
    let mutation =
        Mutation::create(post("1"), json!({"text": "x"})).with_id(OperationId::from("client-42"));

    let first = engine.enqueue_mutation(mutation.clone()).unwrap();
    let second = engine.enqueue_mutation(mutation).unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.queue_len(), 1);
}

#[tokio::test]
async fn read_through_fetches_on_miss_when_online() {
    let (engine, remote, _) = test_engine(test_config());
    remote.set_record(
        post("9"),
        RemoteRecord {
            value: json!({"text": "remote"}),
            version: Version::from("v3"),
            modified_at: None,
        },
    );

    assert_eq!(engine.read_through(&post("9")).await.unwrap(), CacheRead::Miss);

    engine.notify_online();
    let read = engine.read_through(&post("9")).await.unwrap();
    assert_eq!(read.value(), Some(&json!({"text": "remote"})));
    assert_eq!(engine.status().cached_entries, 1);
}

#[tokio::test]
async fn update_after_cache_expiry_uses_last_known_version() {
    let (engine, remote, clock) = test_engine(test_config());
    remote.set_record(
        post("1"),
        RemoteRecord {
            value: json!({"text": "a"}),
            version: Version::from("v1"),
            modified_at: None,
        },
    );
    engine.notify_online();
    engine.read_through(&post("1")).await.unwrap();

    engine.notify_offline();
    clock.advance(engine.config().cache_ttl() + Duration::from_secs(1));
    engine.sweep().unwrap();
    assert_eq!(engine.get_cached_value(&post("1")), CacheRead::Miss);

    let id = engine.enqueue_mutation(Mutation::update(post("1"), json!({"text": "b"}))).unwrap();
    let op = engine.operation(&id).unwrap();
    assert_eq!(op.base_version, Some(Version::from("v1")));
    assert_eq!(op.base_value, Some(json!({"text": "a"})));
    assert_eq!(engine.get_cached_value(&post("1")).value(), Some(&json!({"text": "b"})));
}

async fn park_manual_conflict(
    engine: &crate::test_helpers::TestEngine,
    remote: &crate::test_helpers::ScriptedRemote,
) -> String {
    engine.cache.put(post("1"), json!({"title": "base", "body": "b"}), Version::from("v1"), None);
    engine.enqueue_mutation(Mutation::update(post("1"), json!({"title": "local"}))).unwrap();
    remote.push(ApplyOutcome::Conflict(RemoteRecord {
        value: json!({"title": "remote", "body": "b"}),
        version: Version::from("v2"),
        modified_at: None,
    }));
    engine.notify_online();
    let report = engine.run_cycle().await;
    assert_eq!(report.conflicts, 1);
    engine.list_unresolved_conflicts().pop().unwrap().id
}

#[tokio::test]
async fn resolve_with_value_enqueues_corrective_op() {
    let (engine, remote, _) = test_engine(manual_config());
    let conflict_id = park_manual_conflict(&engine, &remote).await;
    let original = engine.get_conflict(&conflict_id).unwrap().operation_id;

    engine
        .resolve_conflict(&conflict_id, Resolution::Value(json!({"title": "mine", "body": "b"})))
        .unwrap();

    assert_eq!(engine.operation(&original).unwrap().status, OperationStatus::Completed);
    let corrective =
        engine.operation(&OperationId::new(format!("{conflict_id}-resolution"))).unwrap();
    assert_eq!(corrective.kind, OperationKind::Update);
    assert_eq!(corrective.payload, json!({"title": "mine"}));
    assert_eq!(corrective.base_version, Some(Version::from("v2")));
    assert_eq!(corrective.created_at, engine.operation(&original).unwrap().created_at);
    assert!(engine.list_unresolved_conflicts().is_empty());
}

#[tokio::test]
async fn resolve_to_remote_value_only_updates_cache() {
    let (engine, remote, _) = test_engine(manual_config());
    let conflict_id = park_manual_conflict(&engine, &remote).await;

    engine.resolve_conflict(&conflict_id, Resolution::Strategy(Strategy::LastWriterWins)).unwrap();

    assert_eq!(engine.queue_len(), 0);
    let read = engine.get_cached_value(&post("1"));
    assert_eq!(read.value(), Some(&json!({"title": "remote", "body": "b"})));
    assert!(!read.is_pending());
}

#[tokio::test]
async fn reopen_applies_resolution_left_unapplied() {
    let store = Arc::new(MemoryStore::new());
    let conflict_id = {
        let (engine, remote, clock) = test_engine_on(Arc::clone(&store), manual_config());
        let id = park_manual_conflict(&engine, &remote).await;
        // Resolution persisted, process dies before applying it
        engine
            .conflicts
            .resolve(&id, Resolution::Value(json!({"title": "mine"})), clock.now())
            .unwrap();
        id
    };

    let (engine, _, _) = test_engine_on(store, manual_config());
    assert_eq!(engine.status().queue.in_flight, 0);
    let corrective =
        engine.operation(&OperationId::new(format!("{conflict_id}-resolution"))).unwrap();
    assert_eq!(corrective.payload, json!({"title": "mine", "body": null}));
}

#[tokio::test]
async fn status_reports_counts() {
    let (engine, remote, _) = test_engine(manual_config());
    park_manual_conflict(&engine, &remote).await;
    engine.enqueue_mutation(Mutation::create(post("2"), json!({"text": "x"}))).unwrap();

    let status = engine.status();
    assert_eq!(status.connectivity, Connectivity::Online);
    assert_eq!(status.unresolved_conflicts, 1);
    assert_eq!(status.queue.in_flight, 1);
    assert_eq!(status.queue.pending, 1);
    assert!(!status.syncing);
}

#[tokio::test]
async fn dead_letter_can_be_retried() {
    let (engine, remote, _) = test_engine(test_config());
    let id = engine.enqueue_mutation(Mutation::create(post("1"), json!({"text": "x"}))).unwrap();
    remote.push(ApplyOutcome::Failed(RemoteError::Validation("too long".into())));
    engine.notify_online();
    engine.run_cycle().await;
    assert_eq!(engine.dead_letters().len(), 1);

    engine.retry_dead_letter(&id).unwrap();
    engine.run_cycle().await;
    assert_eq!(engine.operation(&id).unwrap().status, OperationStatus::Completed);
}

#[tokio::test]
async fn sweep_prunes_past_retention() {
    let (engine, _, clock) = test_engine(test_config());
    engine.enqueue_mutation(Mutation::create(post("1"), json!({"text": "x"}))).unwrap();
    engine.notify_online();
    engine.run_cycle().await;
    assert_eq!(engine.status().queue.completed, 1);

    clock.advance(Duration::from_secs(3600));
    let report = engine.sweep().unwrap();
    assert_eq!(report.pruned_operations, 0);
    assert_eq!(report.expired_cache_entries, 1);

    clock.advance(Duration::from_secs(86_400));
    assert_eq!(engine.sweep().unwrap().pruned_operations, 1);
    assert_eq!(engine.status().queue.completed, 0);
}

#[test]
fn open_rejects_invalid_config() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(crate::test_helpers::ScriptedRemote::default());
    let clock: Arc<dyn ClockSource> = Arc::new(crate::clock::ManualClock::new(0));
    let config = EngineConfig { fan_out: 0, ..EngineConfig::default() };
    assert!(matches!(SyncEngine::open(store, remote, clock, config), Err(Error::InvalidConfig(_))));
}
