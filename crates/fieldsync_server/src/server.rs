//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::ServerStore;
use fieldsync_protocol::{
    decode, encode, EntityData, EntityKey, FetchRequest, ProtocolError, PullRequest, PullResponse,
    PushAck, PushRequest, RemoteEntity,
};
use std::sync::Arc;
use tracing::warn;

/// Status and CBOR body of a reply to [`SyncServer::handle_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    /// HTTP status code.
    pub status: u16,
    /// CBOR response or [`fieldsync_protocol::ErrorBody`].
    pub body: Vec<u8>,
}

/// The sync server.
///
/// Holds the authoritative entity table and answers pull, push and fetch
/// requests, either as typed calls or as CBOR bodies posted to
/// `/sync/pull`, `/sync/push` and `/sync/fetch`.
///
/// # Example
///
/// ```
/// use fieldsync_server::{SyncServer, ServerConfig};
/// use fieldsync_protocol::{EntityKey, Job, JobStatus};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let version = server.seed(&EntityKey::job("job-1"), Job::with_status(JobStatus::Scheduled).into());
/// assert_eq!(version, 1);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(ServerStore::new()))
    }

    /// Creates a sync server over an existing entity table.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: &PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: &PushRequest) -> ServerResult<PushAck> {
        self.handler.handle_push(request)
    }

    /// Handles a fetch request.
    pub fn handle_fetch(&self, request: &FetchRequest) -> ServerResult<RemoteEntity> {
        self.handler.handle_fetch(request)
    }

    /// Handles a CBOR request posted to `path`.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerReply {
        let result = match path {
            "/sync/pull" => decode::<PullRequest>(body)
                .map_err(invalid)
                .and_then(|request| self.handle_pull(&request))
                .and_then(|response| encode(&response).map_err(internal)),
            "/sync/push" => decode::<PushRequest>(body)
                .map_err(invalid)
                .and_then(|request| self.handle_push(&request))
                .and_then(|ack| encode(&ack).map_err(internal)),
            "/sync/fetch" => decode::<FetchRequest>(body)
                .map_err(invalid)
                .and_then(|request| self.handle_fetch(&request))
                .and_then(|entity| encode(&entity).map_err(internal)),
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        };

        match result {
            Ok(body) => ServerReply { status: 200, body },
            Err(err) => {
                if err.is_server_error() {
                    warn!(path, error = %err, "request failed");
                }
                ServerReply {
                    status: err.status(),
                    body: encode(&err.to_body()).unwrap_or_default(),
                }
            }
        }
    }

    /// Creates or overwrites an entity, as a back-office import would. Returns its version.
    pub fn seed(&self, key: &EntityKey, data: EntityData) -> u64 {
        self.context.store.put(key, data)
    }

    /// Changes an entity the way another device or dispatcher would. Returns its version.
    pub fn remote_edit(&self, key: &EntityKey, data: EntityData) -> u64 {
        self.context.store.put(key, data)
    }

    /// Deletes an entity out from under the clients. Returns false if it was not live.
    pub fn remote_delete(&self, key: &EntityKey) -> bool {
        self.context.store.remove(key)
    }

    /// Returns the live entity for `key`.
    pub fn entity(&self, key: &EntityKey) -> Option<RemoteEntity> {
        self.context.store.get(key)
    }

    /// Returns the entity table.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.context.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}

fn invalid(err: ProtocolError) -> ServerError {
    ServerError::InvalidRequest(err.to_string())
}

fn internal(err: ProtocolError) -> ServerError {
    ServerError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::{Action, ErrorBody, ErrorCode, Job, JobStatus};

    fn job(status: JobStatus) -> EntityData {
        Job::with_status(status).into()
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default());
        assert!(server.store().is_empty());
        let key = EntityKey::job("job-1");
        assert_eq!(server.seed(&key, job(JobStatus::Scheduled)), 1);
        assert_eq!(server.remote_edit(&key, job(JobStatus::Cancelled)), 2);
        assert_eq!(server.entity(&key).unwrap().version, 2);
        assert!(server.remote_delete(&key));
        assert!(server.entity(&key).is_none());
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::new(ServerConfig::default());
        let key = EntityKey::job("job-1");

        let pull = server.handle_pull(&PullRequest::new(0, Vec::new())).unwrap();
        assert!(pull.updated.is_empty());

        let ack = server
            .handle_push(&PushRequest {
                key: key.clone(),
                action: Action::Create,
                payload: Some(job(JobStatus::Scheduled)),
                expected_version: None,
            })
            .unwrap();
        assert_eq!(ack.server_version, 1);

        let pull = server.handle_pull(&PullRequest::new(pull.synced_at, Vec::new())).unwrap();
        assert_eq!(pull.updated.len(), 1);
        assert_eq!(pull.updated[0].key, key);

        let fetched = server.handle_fetch(&FetchRequest { key }).unwrap();
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn post_round_trip() {
        let server = SyncServer::new(ServerConfig::default());
        let key = EntityKey::job("job-1");
        server.seed(&key, job(JobStatus::Scheduled));

        let reply = server.handle_post("/sync/fetch", &encode(&FetchRequest { key: key.clone() }).unwrap());
        assert_eq!(reply.status, 200);
        let entity: RemoteEntity = decode(&reply.body).unwrap();
        assert_eq!(entity.data, job(JobStatus::Scheduled));

        let stale = PushRequest {
            key,
            action: Action::Update,
            payload: Some(job(JobStatus::Completed)),
            expected_version: Some(7),
        };
        let reply = server.handle_post("/sync/push", &encode(&stale).unwrap());
        assert_eq!(reply.status, 409);
        let body: ErrorBody = decode(&reply.body).unwrap();
        assert_eq!(body.code, ErrorCode::Conflict);
        assert_eq!(body.server_version, Some(1));
        assert_eq!(body.server_data, Some(job(JobStatus::Scheduled)));
    }

    #[test]
    fn post_errors() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.handle_post("/sync/pull", &[0xff]).status, 400);
        assert_eq!(server.handle_post("/nope", &[]).status, 404);

        let missing = FetchRequest {
            key: EntityKey::job("ghost"),
        };
        let reply = server.handle_post("/sync/fetch", &encode(&missing).unwrap());
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn rate_limit_replies_429() {
        let server = SyncServer::new(ServerConfig::new().with_rate_limit(1));
        let request = encode(&PullRequest::new(0, Vec::new())).unwrap();
        assert_eq!(server.handle_post("/sync/pull", &request).status, 200);

        let reply = server.handle_post("/sync/pull", &request);
        assert_eq!(reply.status, 429);
        let body: ErrorBody = decode(&reply.body).unwrap();
        assert!(body.retry_after_ms.is_some());
    }
}
