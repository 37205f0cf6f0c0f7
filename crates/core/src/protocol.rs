// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages between a sync client and its remote.
//!
//! The protocol is request/response:
//! - Client sends `apply` and `fetch` requests, each with a `request_id`
//! - Server answers each with exactly one message echoing that id

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conflict::RemoteRecord;
use crate::op::Version;
use crate::remote::{ApplyOutcome, ApplyRequest, RemoteError};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Apply one operation.
    Apply {
        request_id: u64,
        #[serde(flatten)]
        request: ApplyRequest,
    },

    /// Read the current state of an entity.
    Fetch {
        request_id: u64,
        collection: String,
        key: String,
    },

    /// Ping message for keepalive.
    Ping {
        /// Client-chosen ID echoed in Pong.
        id: u64,
    },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The operation was applied (or had already been applied).
    Applied {
        request_id: u64,
        value: Value,
        version: Version,
    },

    /// The base version precondition failed.
    Conflict {
        request_id: u64,
        record: RemoteRecord,
    },

    /// The server refused the operation.
    Rejected {
        request_id: u64,
        reason: String,
        /// Whether the client may retry later.
        retryable: bool,
    },

    /// Response to Fetch; `None` when the entity does not exist.
    Record {
        request_id: u64,
        record: Option<RemoteRecord>,
    },

    /// Pong response to client Ping.
    Pong { id: u64 },

    /// Error not tied to a well-formed request.
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        message: String,
    },
}

impl ClientMessage {
    pub fn apply(request_id: u64, request: ApplyRequest) -> Self {
        ClientMessage::Apply { request_id, request }
    }

    pub fn fetch(request_id: u64, collection: impl Into<String>, key: impl Into<String>) -> Self {
        ClientMessage::Fetch { request_id, collection: collection.into(), key: key.into() }
    }

    pub fn ping(id: u64) -> Self {
        ClientMessage::Ping { id }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Creates an Error message.
    pub fn error(request_id: Option<u64>, message: impl Into<String>) -> Self {
        ServerMessage::Error { request_id, message: message.into() }
    }

    /// The request this message answers, if any. Pongs answer by ping id.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ServerMessage::Applied { request_id, .. }
            | ServerMessage::Conflict { request_id, .. }
            | ServerMessage::Rejected { request_id, .. }
            | ServerMessage::Record { request_id, .. } => Some(*request_id),
            ServerMessage::Pong { id } => Some(*id),
            ServerMessage::Error { request_id, .. } => *request_id,
        }
    }

    /// Interprets a reply to an `apply` request.
    pub fn into_apply_outcome(self) -> ApplyOutcome {
        match self {
            ServerMessage::Applied { value, version, .. } => {
                ApplyOutcome::Applied { value, version, modified_at: None }
            }
            ServerMessage::Conflict { record, .. } => ApplyOutcome::Conflict(record),
            ServerMessage::Rejected { reason, retryable: true, .. } => {
                ApplyOutcome::Failed(RemoteError::Transient(reason))
            }
            ServerMessage::Rejected { reason, retryable: false, .. } => {
                ApplyOutcome::Failed(RemoteError::Validation(reason))
            }
            ServerMessage::Error { message, .. } => {
                ApplyOutcome::Failed(RemoteError::Transient(message))
            }
            other => {
                ApplyOutcome::Failed(RemoteError::Transient(format!("unexpected reply: {other:?}")))
            }
        }
    }

    /// Interprets a reply to a `fetch` request.
    pub fn into_fetch_result(self) -> Result<Option<RemoteRecord>, RemoteError> {
        match self {
            ServerMessage::Record { record, .. } => Ok(record),
            ServerMessage::Rejected { reason, retryable: false, .. } => {
                Err(RemoteError::Validation(reason))
            }
            ServerMessage::Rejected { reason, .. }
            | ServerMessage::Error { message: reason, .. } => {
                Err(RemoteError::Transient(reason))
            }
            other => Err(RemoteError::Transient(format!("unexpected reply: {other:?}"))),
        }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
