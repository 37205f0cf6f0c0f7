// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! [`RemoteApi`] over a WebSocket connection.
//!
//! Requests share one connection and are answered in turn: each exchange
//! takes the transport, (re)connects if needed, sends one message and reads
//! until the reply carrying its id arrives. Replies to abandoned requests
//! are skipped. Any transport failure drops the connection so the next
//! exchange starts fresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use offsync_core::protocol::{ClientMessage, ServerMessage};
use offsync_core::{
    ApplyOutcome, ApplyRequest, EntityKey, FetchResult, RemoteApi, RemoteError, RemoteFuture,
};

use crate::probe::{Beat, Heartbeat};
use crate::transport::{Transport, TransportError, TransportResult, WebSocketTransport};

/// A remote reached over a [`Transport`].
pub struct WebSocketRemote<T: Transport = WebSocketTransport> {
    url: String,
    connect_timeout: Duration,
    heartbeat_timeout: Duration,
    transport: Mutex<T>,
    next_id: AtomicU64,
}

impl WebSocketRemote<WebSocketTransport> {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self::with_transport(url, connect_timeout, heartbeat_timeout, WebSocketTransport::new())
    }
}

impl<T: Transport> WebSocketRemote<T> {
    /// Create a remote with a custom transport (for testing).
    pub fn with_transport(
        url: impl Into<String>,
        connect_timeout: Duration,
        heartbeat_timeout: Duration,
        transport: T,
    ) -> Self {
        WebSocketRemote {
            url: url.into(),
            connect_timeout,
            heartbeat_timeout,
            transport: Mutex::new(transport),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one request and waits for the reply carrying its id.
    async fn exchange(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> TransportResult<ServerMessage> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut transport = self.transport.lock().await;
        let result = self.exchange_on(&mut transport, build(id), id).await;
        if result.is_err() {
            let _ = transport.disconnect().await;
        }
        result
    }

    async fn exchange_on(
        &self,
        transport: &mut T,
        msg: ClientMessage,
        id: u64,
    ) -> TransportResult<ServerMessage> {
        if !transport.is_connected() {
            match tokio::time::timeout(self.connect_timeout, transport.connect(&self.url)).await {
                Ok(connected) => connected?,
                Err(_) => {
                    return Err(TransportError::Timeout(format!(
                        "connecting to {} took longer than {}s",
                        self.url,
                        self.connect_timeout.as_secs()
                    )))
                }
            }
            tracing::info!(url = %self.url, "connected to remote");
        }

        transport.send(msg).await?;
        loop {
            match transport.recv().await? {
                Some(reply) if reply.request_id() == Some(id) => return Ok(reply),
                Some(ServerMessage::Error { request_id: None, message }) => {
                    tracing::warn!(%message, "remote reported an error");
                }
                Some(reply) => {
                    tracing::debug!(
                        request_id = ?reply.request_id(),
                        "skipping reply to an abandoned request"
                    );
                }
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    /// Round-trips a ping.
    pub async fn ping(&self) -> TransportResult<()> {
        match self.exchange(ClientMessage::ping).await? {
            ServerMessage::Pong { .. } => Ok(()),
            other => Err(TransportError::ReceiveFailed(format!("expected pong, got {other:?}"))),
        }
    }

    /// Drops the connection, if any.
    pub async fn disconnect(&self) {
        let mut transport = self.transport.lock().await;
        if transport.is_connected() {
            let _ = transport.disconnect().await;
            tracing::info!(url = %self.url, "disconnected from remote");
        }
    }
}

impl<T: Transport> RemoteApi for WebSocketRemote<T> {
    fn apply_operation(&self, request: ApplyRequest) -> RemoteFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            match self.exchange(|id| ClientMessage::apply(id, request)).await {
                Ok(reply) => reply.into_apply_outcome(),
                Err(e) => ApplyOutcome::Failed(RemoteError::Transient(e.to_string())),
            }
        })
    }

    fn fetch(&self, entity: EntityKey) -> RemoteFuture<'_, FetchResult> {
        Box::pin(async move {
            let reply = self.exchange(|id| ClientMessage::fetch(id, entity.collection, entity.key));
            match reply.await {
                Ok(reply) => reply.into_fetch_result(),
                Err(e) => Err(RemoteError::Transient(e.to_string())),
            }
        })
    }
}

impl<T: Transport> Heartbeat for WebSocketRemote<T> {
    fn beat(&self) -> RemoteFuture<'_, Beat> {
        Box::pin(async move {
            // A request holding the connection is already probing it
            if self.transport.try_lock().is_err() {
                return Beat::Busy;
            }
            match tokio::time::timeout(self.heartbeat_timeout, self.ping()).await {
                Ok(Ok(())) => Beat::Alive,
                Ok(Err(e)) => Beat::Dead(e.to_string()),
                Err(_) => {
                    self.disconnect().await;
                    Beat::Dead(format!("no pong within {}ms", self.heartbeat_timeout.as_millis()))
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
