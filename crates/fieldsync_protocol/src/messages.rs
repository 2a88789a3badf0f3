//! Pull / push / fetch messages exchanged with the sync server.
//!
//! All messages are encoded as CBOR with [`encode`] and [`decode`].

use crate::entity::{EntityData, EntityKey, EntityKind};
use crate::error::{ProtocolError, ProtocolResult};
use crate::queue::Action;
use crate::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encodes a message as CBOR.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Request for entities changed since a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Changes strictly after this timestamp are returned.
    pub since: Timestamp,
    /// Kinds of interest; empty means all.
    pub kinds: Vec<EntityKind>,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(since: Timestamp, kinds: Vec<EntityKind>) -> Self {
        Self { since, kinds }
    }

    /// Returns true if entities of `kind` were requested.
    pub fn wants(&self, kind: EntityKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// An entity as the server holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    /// Entity identity.
    pub key: EntityKey,
    /// Authoritative data.
    pub data: EntityData,
    /// Current server version.
    pub version: u64,
}

/// Changes since the requested cursor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PullResponse {
    /// Created or updated entities.
    pub updated: Vec<RemoteEntity>,
    /// Entities deleted on the server.
    pub deleted: Vec<EntityKey>,
    /// Cursor value to store once this response is applied.
    pub synced_at: Timestamp,
    /// True if the server truncated the response; pull again from `synced_at`.
    #[serde(default)]
    pub has_more: bool,
}

/// One outbound mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Affected entity.
    pub key: EntityKey,
    /// Mutation kind.
    pub action: Action,
    /// New data; `None` for deletes.
    pub payload: Option<EntityData>,
    /// Version the device believes is current; `None` for never-synced entities.
    pub expected_version: Option<u64>,
}

/// Successful push reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Version assigned to the accepted write.
    pub server_version: u64,
}

/// Request for the authoritative copy of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Entity to fetch.
    pub key: EntityKey,
}

/// Machine-readable reason for a non-success reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Expected version is stale.
    Conflict,
    /// Too many requests.
    RateLimited,
    /// Payload failed validation.
    Rejected,
    /// Entity does not exist.
    NotFound,
    /// Request could not be decoded.
    BadRequest,
    /// Server-side failure.
    Internal,
}

/// Body of a non-success reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Reason code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Current server version (conflicts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    /// Current server data (conflicts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<EntityData>,
    /// Suggested wait before retrying (rate limits only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorBody {
    /// Creates an error body with only a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            server_version: None,
            server_data: None,
            retry_after_ms: None,
        }
    }

    /// A version conflict carrying the server's current state.
    pub fn conflict(server_version: u64, server_data: Option<EntityData>) -> Self {
        Self {
            server_version: Some(server_version),
            server_data,
            ..Self::new(
                ErrorCode::Conflict,
                format!("version mismatch, server is at {server_version}"),
            )
        }
    }

    /// A rate-limit reply with a retry hint.
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self {
            retry_after_ms: Some(retry_after_ms),
            ..Self::new(ErrorCode::RateLimited, "rate limit exceeded")
        }
    }
}
