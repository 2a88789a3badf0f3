//! Error types for the sync engine.

use fieldsync_journal::JournalError;
use fieldsync_protocol::{EntityData, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures reported by the remote sync API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The write asserted a stale version.
    #[error("version conflict: server is at version {server_version}")]
    Conflict {
        /// Current server version.
        server_version: u64,
        /// Current server data, when the server included it.
        server_data: Option<EntityData>,
    },

    /// The server asked the client to slow down.
    #[error("rate limited")]
    RateLimited {
        /// Server-suggested wait before retrying.
        retry_after: Option<Duration>,
    },

    /// The server rejected the payload as invalid.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The entity does not exist on the server.
    #[error("entity not found")]
    NotFound,

    /// Network or client-side I/O failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server failed internally.
    #[error("server error: {0}")]
    Server(String),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Returns true for rate-limit responses.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    /// Returns true for version conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }

    /// Returns the server's retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<ProtocolError> for RemoteError {
    fn from(err: ProtocolError) -> Self {
        RemoteError::Protocol(err.to_string())
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local persistence failed.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// A protocol value was invalid.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A local mutation was malformed and was not queued.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// A remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The pull phase failed; the cycle was aborted before pushing.
    #[error("pull failed: {0}")]
    PullFailed(RemoteError),

    /// No queue item has this id.
    #[error("unknown queue item: {0}")]
    UnknownItem(u64),

    /// No conflict record has this id.
    #[error("unknown conflict: {0}")]
    UnknownConflict(String),

    /// The requested conflict resolution cannot be applied.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// The background service is already running.
    #[error("sync service already running")]
    AlreadyRunning,

    /// The background service is not running.
    #[error("sync service not running")]
    NotRunning,

    /// The worker thread could not be spawned.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Returns true if the next trigger may succeed without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::PullFailed(remote) | SyncError::Remote(remote) => matches!(
                remote,
                RemoteError::Transport(_) | RemoteError::Server(_) | RemoteError::RateLimited { .. }
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_classification() {
        let limited = RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(limited.is_rate_limited());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        let conflict = RemoteError::Conflict {
            server_version: 4,
            server_data: None,
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_rate_limited());
        assert_eq!(conflict.retry_after(), None);
    }

    #[test]
    fn transient_errors() {
        assert!(SyncError::PullFailed(RemoteError::Transport("reset".into())).is_transient());
        assert!(SyncError::Remote(RemoteError::Server("503".into())).is_transient());
        assert!(!SyncError::PullFailed(RemoteError::Rejected("bad kind".into())).is_transient());
        assert!(!SyncError::UnknownItem(7).is_transient());
    }

    #[test]
    fn error_display() {
        let err = SyncError::PullFailed(RemoteError::NotFound);
        assert_eq!(err.to_string(), "pull failed: entity not found");
        assert_eq!(SyncError::UnknownItem(3).to_string(), "unknown queue item: 3");
    }
}
