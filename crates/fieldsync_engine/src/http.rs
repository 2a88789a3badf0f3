//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so the engine does not
//! pick a networking library. Bodies are CBOR; failures carry an
//! [`ErrorBody`] and an HTTP status the remote maps to [`RemoteError`].

use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::RemoteSyncApi;
use fieldsync_protocol::{
    decode, encode, ErrorBody, ErrorCode, FetchRequest, PullRequest, PullResponse, PushAck,
    PushRequest, RemoteEntity,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::trace;

/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/pull";
/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/sync/push";
/// Path of the fetch endpoint.
pub const FETCH_PATH: &str = "/sync/fetch";

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Creates a reply.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
/// An `Err` means no response was received (DNS, connect, timeout).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<HttpReply, String>;
}

/// [`RemoteSyncApi`] over an [`HttpClient`].
pub struct HttpRemote<C: HttpClient> {
    base_url: String,
    client: C,
    timeout: Duration,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a remote for the server at `base_url` (e.g. `https://sync.example.com`).
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(30),
        }
    }

    /// Creates a remote that uses the request timeout from `config`.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client).with_timeout(config.timeout)
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn post_cbor<Req, Res>(&self, path: &str, request: &Req) -> RemoteResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = encode(request)?;
        let url = format!("{}{}", self.base_url, path);
        let reply = self
            .client
            .post(&url, body, self.timeout)
            .map_err(RemoteError::Transport)?;
        trace!(url = %url, status = reply.status, bytes = reply.body.len(), "http reply");

        if reply.is_success() {
            return Ok(decode(&reply.body)?);
        }
        Err(error_from_reply(&reply))
    }
}

/// Maps a non-success reply to a [`RemoteError`].
///
/// The status decides the class; the [`ErrorBody`], when it decodes, supplies
/// the details.
pub fn error_from_reply(reply: &HttpReply) -> RemoteError {
    let body: Option<ErrorBody> = decode(&reply.body).ok();
    let message = body
        .as_ref()
        .map(|b| b.message.clone())
        .unwrap_or_else(|| format!("http status {}", reply.status));

    match (reply.status, body) {
        (409, Some(body)) if body.code == ErrorCode::Conflict => RemoteError::Conflict {
            server_version: body.server_version.unwrap_or(0),
            server_data: body.server_data,
        },
        (409, _) => RemoteError::Protocol(format!("conflict without server version: {message}")),
        (429, body) => RemoteError::RateLimited {
            retry_after: body
                .and_then(|b| b.retry_after_ms)
                .map(Duration::from_millis),
        },
        (404, _) => RemoteError::NotFound,
        (400 | 422, _) => RemoteError::Rejected(message),
        (500..=599, _) => RemoteError::Server(message),
        _ => RemoteError::Transport(message),
    }
}

impl<C: HttpClient> RemoteSyncApi for HttpRemote<C> {
    fn pull(&self, request: &PullRequest) -> RemoteResult<PullResponse> {
        self.post_cbor(PULL_PATH, request)
    }

    fn push(&self, request: &PushRequest) -> RemoteResult<PushAck> {
        self.post_cbor(PUSH_PATH, request)
    }

    fn fetch(&self, request: &FetchRequest) -> RemoteResult<RemoteEntity> {
        self.post_cbor(FETCH_PATH, request)
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpRemote<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request.
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpReply;
}

impl<T: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<T> {
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpReply {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<HttpReply, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, &body))
    }
}
