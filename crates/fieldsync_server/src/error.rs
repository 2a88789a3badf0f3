//! Error types for the sync server.

use fieldsync_protocol::{EntityData, ErrorBody, ErrorCode};
use std::time::Duration;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// The request body could not be decoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The mutation failed validation.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The client's expected version is stale.
    #[error("version conflict: server is at {version}")]
    Conflict {
        /// Current version.
        version: u64,
        /// Current data; `None` for a deleted entity.
        data: Option<EntityData>,
    },

    /// The entity does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The request rate limit was exceeded.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Time until a request would be admitted.
        retry_after: Duration,
    },

    /// Unknown endpoint.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::Rejected(_) => 422,
            ServerError::Conflict { .. } => 409,
            ServerError::NotFound(_) | ServerError::UnknownEndpoint(_) => 404,
            ServerError::RateLimited { .. } => 429,
            ServerError::Internal(_) => 500,
        }
    }

    /// Wire body for this error.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            ServerError::Conflict { version, data } => ErrorBody::conflict(*version, data.clone()),
            ServerError::RateLimited { retry_after } => ErrorBody::rate_limited(
                u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            ),
            ServerError::InvalidRequest(_) | ServerError::UnknownEndpoint(_) => {
                ErrorBody::new(ErrorCode::BadRequest, self.to_string())
            }
            ServerError::Rejected(reason) => ErrorBody::new(ErrorCode::Rejected, reason.clone()),
            ServerError::NotFound(_) => ErrorBody::new(ErrorCode::NotFound, self.to_string()),
            ServerError::Internal(_) => ErrorBody::new(ErrorCode::Internal, self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::Rejected("bad".into()).is_server_error());
    }

    #[test]
    fn statuses_and_bodies() {
        let conflict = ServerError::Conflict {
            version: 4,
            data: None,
        };
        assert_eq!(conflict.status(), 409);
        assert_eq!(conflict.to_body().server_version, Some(4));

        let limited = ServerError::RateLimited {
            retry_after: Duration::from_millis(1200),
        };
        assert_eq!(limited.status(), 429);
        assert_eq!(limited.to_body().retry_after_ms, Some(1200));

        let rejected = ServerError::Rejected("photo data cannot describe job/1".into());
        assert_eq!(rejected.status(), 422);
        assert_eq!(rejected.to_body().message, "photo data cannot describe job/1");
    }
}
