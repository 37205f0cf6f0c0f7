// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared IPC protocol between `offsyncd` and the applications that drive it.
//!
//! A UI or ops tool sends one [`DaemonRequest`] per connection over the
//! daemon's Unix socket and reads back one [`DaemonResponse`]. Messages are
//! serialized as JSON with length-prefixed framing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use offsync_core::{
    CacheRead, ConflictRecord, CorruptRecord, CycleReport, EngineStatus, Mutation, OperationId,
    PendingOperation, Resolution,
};

/// Protocol version exchanged in the `Hello` handshake.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Protocol types
// ============================================================================

/// Request sent to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonRequest {
    /// Ping to check if daemon is alive.
    Ping,
    /// Version handshake request.
    Hello { version: String },
    /// Get daemon and engine status.
    Status,
    /// Graceful shutdown.
    Shutdown,
    /// Queue a local write.
    Enqueue { mutation: Mutation },
    /// List conflicts awaiting a decision.
    ListConflicts,
    /// Settle a conflict.
    ResolveConflict { id: String, resolution: Resolution },
    /// Read an entity with pending writes overlaid. With `fetch`, a cache
    /// miss is filled from the remote while online.
    GetValue {
        collection: String,
        key: String,
        #[serde(default)]
        fetch: bool,
    },
    ListDeadLetters,
    RetryDeadLetter { id: OperationId },
    /// Run a sync cycle now and report what it did.
    SyncNow,
}

/// Response sent from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    /// Pong response.
    Pong,
    /// Version handshake response.
    Hello { version: String },
    /// Status response.
    Status(DaemonStatus),
    /// Shutdown acknowledged.
    ShuttingDown,
    Enqueued { id: OperationId },
    Conflicts { conflicts: Vec<ConflictRecord> },
    Resolved { conflict: ConflictRecord },
    Value { read: CacheRead },
    /// Dead letters, plus queue records quarantined as undecodable.
    DeadLetters {
        operations: Vec<PendingOperation>,
        #[serde(default)]
        corrupt: Vec<CorruptRecord>,
    },
    Requeued { operation: PendingOperation },
    Synced { report: CycleReport },
    /// Error response.
    Error { message: String },
}

/// Daemon status information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonStatus {
    /// Current daemon PID.
    pub pid: u32,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    /// Remote the daemon syncs with.
    pub remote_url: String,
    pub engine: EngineStatus,
}

impl DaemonStatus {
    /// Create a new status with the given parameters.
    pub fn new(
        pid: u32,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        remote_url: String,
        engine: EngineStatus,
    ) -> Self {
        let uptime_secs = u64::try_from((now - started_at).num_seconds()).unwrap_or(0);
        DaemonStatus { pid, uptime_secs, started_at, remote_url, engine }
    }
}

// ============================================================================
// Message framing
// ============================================================================

/// IPC message framing.
///
/// Messages are framed as:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON-encoded message
///
/// The blocking helpers serve simple clients; async servers read the header,
/// check it with [`decode_len`], then hand the body to [`decode`].
pub mod framing {
    use std::io::{Read, Write};

    use serde::de::DeserializeOwned;
    use serde::Serialize;

    /// Maximum message size (1MB) to prevent malformed messages from causing hangs.
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    /// Serialize a message into a complete frame.
    pub fn encode<T: Serialize>(message: &T) -> std::io::Result<Vec<u8>> {
        let json = serde_json::to_vec(message)
            .map_err(|e| std::io::Error::other(format!("serialize error: {e}")))?;
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::other(format!(
                "message too large: {} bytes (max {})",
                json.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        let len =
            u32::try_from(json.len()).map_err(|_| std::io::Error::other("message too large"))?;

        let mut frame = Vec::with_capacity(4 + json.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&json);
        Ok(frame)
    }

    /// Validate a length header and return the body size.
    pub fn decode_len(header: [u8; 4]) -> std::io::Result<usize> {
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(std::io::Error::other(format!(
                "message too large: {} bytes (max {})",
                len, MAX_MESSAGE_SIZE
            )));
        }
        Ok(len)
    }

    /// Deserialize a frame body.
    pub fn decode<T: DeserializeOwned>(body: &[u8]) -> std::io::Result<T> {
        serde_json::from_slice(body)
            .map_err(|e| std::io::Error::other(format!("deserialize error: {e}")))
    }

    /// Write a serializable message to the given writer.
    pub fn write_message<W: Write, T: Serialize>(
        writer: &mut W,
        message: &T,
    ) -> std::io::Result<()> {
        writer.write_all(&encode(message)?)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a deserializable message from the given reader.
    pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> std::io::Result<T> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = decode_len(len_buf)?;

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        decode(&buf)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Blocking client for one request/response exchange.
pub mod client {
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::time::Duration;

    use super::{framing, DaemonRequest, DaemonResponse};

    /// Send `request` to the daemon listening on `socket_path`.
    pub fn send(
        socket_path: &Path,
        request: &DaemonRequest,
        timeout: Duration,
    ) -> std::io::Result<DaemonResponse> {
        let mut stream = UnixStream::connect(socket_path)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        framing::write_message(&mut stream, request)?;
        framing::read_message(&mut stream)
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
