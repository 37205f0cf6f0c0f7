// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end sync scenarios against an in-memory versioned server.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;
use common::*;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

#[tokio::test]
async fn offline_create_syncs_when_online() {
    let (engine, remote, _clock) = engine(config());
    let entity = post("1");

    engine.enqueue_mutation(Mutation::create(entity.clone(), json!({"text": "hi"}))).unwrap();
    assert_eq!(engine.queue_len(), 1);
    assert!(engine.get_cached_value(&entity).is_pending());

    let report = engine.run_cycle().await;
    assert_eq!(report.dispatched, 0, "nothing is sent while offline");
    assert!(remote.applied().is_empty());

    assert!(engine.notify_online());
    let report = engine.run_cycle().await;
    assert_eq!(report.completed, 1);
    assert_eq!(engine.queue_len(), 0);

    let CacheRead::Fresh { record } = engine.get_cached_value(&entity) else {
        panic!("expected a fresh cache entry");
    };
    assert_eq!(record.value, json!({"text": "hi"}));
    assert_eq!(Some(record.remote_version), remote.version(&entity));
}

#[tokio::test]
async fn offline_writes_replay_in_order() {
    let (engine, remote, _clock) = engine(config());

    let a = engine
        .enqueue_mutation(Mutation::create(post("a"), json!({"text": "a", "likes": 0})))
        .unwrap();
    let b = engine.enqueue_mutation(Mutation::create(post("b"), json!({"text": "b"}))).unwrap();
    let a2 = engine.enqueue_mutation(Mutation::update(post("a"), json!({"likes": 1}))).unwrap();
    assert_eq!(engine.queue_len(), 3);

    engine.notify_online();
    engine.run_cycle().await;

    let order = remote.applied();
    assert_eq!(order, vec![a.to_string(), b.to_string(), a2.to_string()]);
    assert_eq!(remote.value(&post("a")), Some(json!({"text": "a", "likes": 1})));
    assert_eq!(engine.queue_len(), 0);
}

#[tokio::test]
async fn transient_failures_retry_then_dead_letter() {
    let (engine, remote, clock) = engine(config());
    let id = engine.enqueue_mutation(Mutation::create(post("1"), json!({"text": "x"}))).unwrap();
    engine.notify_online();

    remote.fail_next(3);
    for _ in 0..3 {
        engine.run_cycle().await;
        clock.advance(Duration::from_secs(10));
    }

    let dead = engine.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(engine.status().queue.dead_letter, 1);

    engine.retry_dead_letter(&id).unwrap();
    engine.run_cycle().await;
    assert!(engine.dead_letters().is_empty());
    assert_eq!(remote.applied(), vec![id.to_string()]);
}

#[tokio::test]
async fn concurrent_edit_is_field_merged() {
    let (engine, remote, clock) = engine(config());
    let entity = post("1");
    remote.server_write(&entity, json!({"text": "draft", "likes": 0}));

    engine.notify_online();
    let read = engine.read_through(&entity).await.unwrap();
    assert_eq!(read.value(), Some(&json!({"text": "draft", "likes": 0})));

    engine.notify_offline();
    engine.enqueue_mutation(Mutation::update(entity.clone(), json!({"text": "final"}))).unwrap();
    remote.server_write(&entity, json!({"text": "draft", "likes": 5}));

    clock.advance(Duration::from_secs(5));
    engine.notify_online();
    let report = engine.run_cycle().await;

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.auto_resolved, 1);
    assert_eq!(remote.value(&entity), Some(json!({"text": "final", "likes": 5})));
    assert!(engine.list_unresolved_conflicts().is_empty());
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(
        engine.get_cached_value(&entity).value(),
        Some(&json!({"text": "final", "likes": 5}))
    );
}

#[tokio::test]
async fn manual_policy_waits_for_resolution() {
    let mut cfg = config();
    cfg.collections.insert("posts".to_string(), Strategy::Manual);
    let (engine, remote, _clock) = engine(cfg);
    let entity = post("1");
    let v1 = remote.server_write(&entity, json!({"text": "one"}));

    let id = engine
        .enqueue_mutation(
            Mutation::update(entity.clone(), json!({"text": "mine"})).with_base_version(v1),
        )
        .unwrap();
    remote.server_write(&entity, json!({"text": "theirs"}));

    engine.notify_online();
    engine.run_cycle().await;

    let conflicts = engine.list_unresolved_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].operation_id, id);
    assert_eq!(remote.value(&entity), Some(json!({"text": "theirs"})));

    // Another cycle does not touch the parked write
    engine.run_cycle().await;
    assert_eq!(remote.applied(), Vec::<String>::new());

    engine.resolve_conflict(&conflicts[0].id, Resolution::Value(json!({"text": "both"}))).unwrap();
    engine.run_cycle().await;

    assert_eq!(remote.value(&entity), Some(json!({"text": "both"})));
    assert!(engine.list_unresolved_conflicts().is_empty());
    assert_eq!(engine.queue_len(), 0);
}

#[tokio::test]
async fn in_flight_work_survives_a_crash() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsync.db");
    let clock = Arc::new(ManualClock::new(1_000_000));
    let remote = VersionedRemote::new();

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let clock_source = Arc::clone(&clock) as Arc<dyn ClockSource>;
        let engine =
            SyncEngine::open(store, Arc::clone(&remote), clock_source, config()).unwrap();
        engine.enqueue_mutation(Mutation::create(post("1"), json!({"text": "a"}))).unwrap();
        engine.enqueue_mutation(Mutation::create(post("2"), json!({"text": "b"}))).unwrap();

        engine.notify_online();
        remote.hang(true);
        let cut = tokio::time::timeout(Duration::from_millis(50), engine.run_cycle()).await;
        assert!(cut.is_err(), "cycle should still be waiting on the remote");
        assert_eq!(engine.status().queue.in_flight, 2);
    }

    remote.hang(false);
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let clock_source = Arc::clone(&clock) as Arc<dyn ClockSource>;
    let engine = SyncEngine::open(store, Arc::clone(&remote), clock_source, config()).unwrap();
    let counts = engine.status().queue;
    assert_eq!(counts.in_flight, 0);
    assert_eq!(counts.pending, 2);

    engine.notify_online();
    let report = engine.run_cycle().await;
    assert_eq!(report.completed, 2);
    assert_eq!(remote.value(&post("1")), Some(json!({"text": "a"})));
    assert_eq!(remote.value(&post("2")), Some(json!({"text": "b"})));
}

#[tokio::test(start_paused = true)]
async fn overlapping_cycles_coalesce() {
    let (engine, remote, _clock) = engine(config());
    remote.set_delay(Duration::from_millis(200));
    engine.enqueue_mutation(Mutation::create(post("1"), json!({"text": "a"}))).unwrap();
    engine.notify_online();

    let (first, second) = tokio::join!(engine.run_cycle(), engine.run_cycle());

    assert!(!first.coalesced);
    assert!(second.coalesced);
    assert_eq!(first.completed, 1);
    assert_eq!(remote.applied().len(), 1);
}
