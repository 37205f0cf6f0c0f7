// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use offsync_core::protocol::{ClientMessage, ServerMessage};
use offsync_core::{
    ApplyOutcome, ApplyRequest, ClockSource, EngineConfig, EntityKey, FetchResult, ManualClock,
    MemoryStore, RemoteApi, RemoteFuture, RemoteRecord, SyncEngine, Version,
};

use crate::transport::{Transport, TransportError, TransportFuture};

type Responder = Box<dyn Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync>;

/// State shared between a [`ScriptedTransport`] and the test holding it.
#[derive(Default)]
pub struct Script {
    sent: Mutex<Vec<ClientMessage>>,
    inbox: Mutex<VecDeque<ServerMessage>>,
    responder: Mutex<Option<Responder>>,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    silent: AtomicBool,
}

impl Script {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Queues a message ahead of any replies.
    pub fn push(&self, msg: ServerMessage) {
        self.inbox.lock().unwrap().push_back(msg);
    }

    /// Answers each sent message with the responder's output.
    pub fn respond<F>(&self, f: F)
    where
        F: Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Some(Box::new(f));
    }

    pub fn fail_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// With nothing to read, wait forever instead of reporting a close.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }
}

/// A transport that replays a [`Script`] instead of touching the network.
pub struct ScriptedTransport {
    connected: bool,
    script: Arc<Script>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        (ScriptedTransport { connected: false, script: Arc::clone(&script) }, script)
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, _url: &str) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.script.connects.fetch_add(1, Ordering::SeqCst);
            let failing = self.script.failing_connects.load(Ordering::SeqCst);
            if failing > 0 {
                self.script.failing_connects.store(failing - 1, Ordering::SeqCst);
                return Err(TransportError::ConnectionFailed("connection refused".to_string()));
            }
            self.connected = true;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.connected = false;
            Ok(())
        })
    }

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.connected {
                return Err(TransportError::ConnectionClosed);
            }
            let replies = match self.script.responder.lock().unwrap().as_ref() {
                Some(respond) => respond(&msg),
                None => Vec::new(),
            };
            self.script.inbox.lock().unwrap().extend(replies);
            self.script.sent.lock().unwrap().push(msg);
            Ok(())
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<ServerMessage>> {
        Box::pin(async move {
            let next = self.script.inbox.lock().unwrap().pop_front();
            match next {
                Some(msg) => Ok(Some(msg)),
                None if self.script.silent.load(Ordering::SeqCst) => std::future::pending().await,
                None => {
                    self.connected = false;
                    Ok(None)
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// The id a client message carries.
pub fn message_id(msg: &ClientMessage) -> u64 {
    match msg {
        ClientMessage::Apply { request_id, .. } | ClientMessage::Fetch { request_id, .. } => {
            *request_id
        }
        ClientMessage::Ping { id } => *id,
    }
}

/// A remote that accepts every write at version `v1`.
#[derive(Default)]
pub struct AcceptingRemote {
    pub applied: Mutex<Vec<ApplyRequest>>,
}

impl RemoteApi for AcceptingRemote {
    fn apply_operation(&self, request: ApplyRequest) -> RemoteFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            let value = request.payload.clone();
            self.applied.lock().unwrap().push(request);
            ApplyOutcome::Applied { value, version: Version::new("v1"), modified_at: None }
        })
    }

    fn fetch(&self, entity: EntityKey) -> RemoteFuture<'_, FetchResult> {
        Box::pin(async move {
            if entity.key == "missing" {
                return Ok(None);
            }
            Ok(Some(RemoteRecord {
                value: serde_json::json!({"key": entity.key}),
                version: Version::new("v7"),
                modified_at: None,
            }))
        })
    }
}

pub type TestEngine = SyncEngine<Arc<MemoryStore>, Arc<AcceptingRemote>>;

pub fn test_engine() -> (Arc<TestEngine>, Arc<AcceptingRemote>) {
    test_engine_on(Arc::new(MemoryStore::new()))
}

/// An engine opened over an existing store.
pub fn test_engine_on(store: Arc<MemoryStore>) -> (Arc<TestEngine>, Arc<AcceptingRemote>) {
    let remote = Arc::new(AcceptingRemote::default());
    let clock: Arc<dyn ClockSource> = Arc::new(ManualClock::new(1_000_000));
    let engine =
        SyncEngine::open(store, Arc::clone(&remote), clock, EngineConfig::default()).unwrap();
    (Arc::new(engine), remote)
}
