// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Unix socket server for the UI/ops surface.
//!
//! One request and one response per connection, framed as in
//! [`offsync_ipc::framing`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use offsync_core::{EntityKey, KvStore, RemoteApi, SyncEngine};
use offsync_ipc::{framing, DaemonRequest, DaemonResponse, DaemonStatus, PROTOCOL_VERSION};

/// How long a client may take to send its request.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Daemon facts reported by `Status`.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    pub started_at: DateTime<Utc>,
    pub remote_url: String,
}

/// Accepts connections until `shutdown` fires. A `Shutdown` request fires it.
pub async fn serve<S, R>(
    listener: UnixListener,
    engine: Arc<SyncEngine<S, R>>,
    info: Arc<DaemonInfo>,
    shutdown: CancellationToken,
) where
    S: KvStore + 'static,
    R: RemoteApi + 'static,
{
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let engine = Arc::clone(&engine);
                let info = Arc::clone(&info);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &engine, &info, &shutdown).await {
                        tracing::warn!(error = %e, "ipc connection failed");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
        }
    }
    tracing::debug!("ipc server stopped");
}

async fn handle_connection<S: KvStore, R: RemoteApi>(
    mut stream: UnixStream,
    engine: &SyncEngine<S, R>,
    info: &DaemonInfo,
    shutdown: &CancellationToken,
) -> io::Result<()> {
    let read = tokio::time::timeout(READ_TIMEOUT, read_frame(&mut stream));
    let request: DaemonRequest = match read.await {
        Ok(request) => request?,
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "client sent no request")),
    };
    let response = handle_request(engine, info, request).await;
    write_frame(&mut stream, &response).await?;

    if response == DaemonResponse::ShuttingDown {
        tracing::info!("shutdown requested over ipc");
        shutdown.cancel();
    }
    Ok(())
}

/// Answers one request.
pub async fn handle_request<S: KvStore, R: RemoteApi>(
    engine: &SyncEngine<S, R>,
    info: &DaemonInfo,
    request: DaemonRequest,
) -> DaemonResponse {
    tracing::debug!(?request, "ipc request");
    match request {
        DaemonRequest::Ping => DaemonResponse::Pong,
        DaemonRequest::Hello { version } => {
            if version != PROTOCOL_VERSION {
                tracing::warn!(
                    client = %version,
                    daemon = PROTOCOL_VERSION,
                    "ipc version mismatch"
                );
            }
            DaemonResponse::Hello { version: PROTOCOL_VERSION.to_string() }
        }
        DaemonRequest::Status => DaemonResponse::Status(DaemonStatus::new(
            std::process::id(),
            info.started_at,
            Utc::now(),
            info.remote_url.clone(),
            engine.status(),
        )),
        DaemonRequest::Shutdown => DaemonResponse::ShuttingDown,
        DaemonRequest::Enqueue { mutation } => match engine.enqueue_mutation(mutation) {
            Ok(id) => DaemonResponse::Enqueued { id },
            Err(e) => error_response(e),
        },
        DaemonRequest::ListConflicts => {
            DaemonResponse::Conflicts { conflicts: engine.list_unresolved_conflicts() }
        }
        DaemonRequest::ResolveConflict { id, resolution } => {
            match engine.resolve_conflict(&id, resolution) {
                Ok(conflict) => DaemonResponse::Resolved { conflict },
                Err(e) => error_response(e),
            }
        }
        DaemonRequest::GetValue { collection, key, fetch } => {
            let entity = EntityKey::new(collection, key);
            if !fetch {
                return DaemonResponse::Value { read: engine.get_cached_value(&entity) };
            }
            match engine.read_through(&entity).await {
                Ok(read) => DaemonResponse::Value { read },
                Err(e) => error_response(e),
            }
        }
        DaemonRequest::ListDeadLetters => DaemonResponse::DeadLetters {
            operations: engine.dead_letters(),
            corrupt: engine.corrupt_records(),
        },
        DaemonRequest::RetryDeadLetter { id } => match engine.retry_dead_letter(&id) {
            Ok(operation) => DaemonResponse::Requeued { operation },
            Err(e) => error_response(e),
        },
        DaemonRequest::SyncNow => DaemonResponse::Synced { report: engine.run_cycle().await },
    }
}

fn error_response(e: offsync_core::Error) -> DaemonResponse {
    DaemonResponse::Error { message: e.to_string() }
}

async fn read_frame<T: DeserializeOwned>(stream: &mut (impl AsyncRead + Unpin)) -> io::Result<T> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = framing::decode_len(header)?;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    framing::decode(&body)
}

async fn write_frame<T: Serialize>(
    stream: &mut (impl AsyncWrite + Unpin),
    message: &T,
) -> io::Result<()> {
    stream.write_all(&framing::encode(message)?).await?;
    stream.flush().await
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
