//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::limits::RequestLimits;
use crate::store::ServerStore;
use fieldsync_protocol::{
    FetchRequest, PullRequest, PullResponse, PushAck, PushRequest, RemoteEntity,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Entity table (shared across all handlers).
    pub store: Arc<ServerStore>,
    limits: RequestLimits,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        let limits = RequestLimits::new(config.requests_per_minute);
        Self {
            config,
            store,
            limits,
        }
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        self.admit("pull")?;
        let response = self
            .context
            .store
            .changes_since(request, self.context.config.max_pull_batch);
        debug!(
            since = request.since,
            updated = response.updated.len(),
            deleted = response.deleted.len(),
            has_more = response.has_more,
            "pull served"
        );
        Ok(response)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: &PushRequest) -> ServerResult<PushAck> {
        self.admit("push")?;
        let result = self.context.store.apply(request);
        match &result {
            Ok(ack) => debug!(
                entity = %request.key,
                action = %request.action,
                version = ack.server_version,
                "push accepted"
            ),
            Err(err) => debug!(entity = %request.key, error = %err, "push refused"),
        }
        result
    }

    /// Handles a fetch request.
    pub fn handle_fetch(&self, request: &FetchRequest) -> ServerResult<RemoteEntity> {
        self.admit("fetch")?;
        self.context
            .store
            .get(&request.key)
            .ok_or_else(|| ServerError::NotFound(request.key.to_string()))
    }

    fn admit(&self, endpoint: &str) -> ServerResult<()> {
        self.context.limits.check().inspect_err(|err| {
            warn!(endpoint, error = %err, "request throttled");
        })
    }
}
