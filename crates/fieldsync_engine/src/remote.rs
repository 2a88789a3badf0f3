//! Remote sync API abstraction.

use crate::error::{RemoteError, RemoteResult};
use fieldsync_protocol::{
    FetchRequest, PullRequest, PullResponse, PushAck, PushRequest, RemoteEntity,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The remote source of truth, as seen by the engine.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, scripted mocks).
pub trait RemoteSyncApi: Send + Sync {
    /// Returns entities changed since `request.since`.
    fn pull(&self, request: &PullRequest) -> RemoteResult<PullResponse>;

    /// Sends one mutation.
    fn push(&self, request: &PushRequest) -> RemoteResult<PushAck>;

    /// Returns the authoritative copy of one entity.
    fn fetch(&self, request: &FetchRequest) -> RemoteResult<RemoteEntity>;
}

impl<T: RemoteSyncApi + ?Sized> RemoteSyncApi for Arc<T> {
    fn pull(&self, request: &PullRequest) -> RemoteResult<PullResponse> {
        (**self).pull(request)
    }

    fn push(&self, request: &PushRequest) -> RemoteResult<PushAck> {
        (**self).push(request)
    }

    fn fetch(&self, request: &FetchRequest) -> RemoteResult<RemoteEntity> {
        (**self).fetch(request)
    }
}

/// A scripted remote for testing.
///
/// Each call kind pops its next scripted response. When a script runs dry,
/// pulls return an empty page at the requested cursor, pushes succeed with
/// `expected_version + 1`, and fetches return `NotFound`.
#[derive(Debug)]
pub struct MockRemote {
    online: AtomicBool,
    pulls: Mutex<VecDeque<RemoteResult<PullResponse>>>,
    pushes: Mutex<VecDeque<RemoteResult<PushAck>>>,
    fetches: Mutex<VecDeque<RemoteResult<RemoteEntity>>>,
    pull_log: Mutex<Vec<PullRequest>>,
    push_log: Mutex<Vec<PushRequest>>,
    fetch_log: Mutex<Vec<FetchRequest>>,
}

impl MockRemote {
    /// Creates an online mock with empty scripts.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            pulls: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(VecDeque::new()),
            fetches: Mutex::new(VecDeque::new()),
            pull_log: Mutex::new(Vec::new()),
            push_log: Mutex::new(Vec::new()),
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the next pull response.
    pub fn script_pull(&self, response: RemoteResult<PullResponse>) {
        self.pulls.lock().push_back(response);
    }

    /// Scripts the next push response.
    pub fn script_push(&self, response: RemoteResult<PushAck>) {
        self.pushes.lock().push_back(response);
    }

    /// Scripts the next fetch response.
    pub fn script_fetch(&self, response: RemoteResult<RemoteEntity>) {
        self.fetches.lock().push_back(response);
    }

    /// Simulates losing or regaining the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Pull requests received so far.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_log.lock().clone()
    }

    /// Push requests received so far.
    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.push_log.lock().clone()
    }

    /// Fetch requests received so far.
    pub fn fetch_requests(&self) -> Vec<FetchRequest> {
        self.fetch_log.lock().clone()
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Transport("network unreachable".into()))
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteSyncApi for MockRemote {
    fn pull(&self, request: &PullRequest) -> RemoteResult<PullResponse> {
        self.check_online()?;
        self.pull_log.lock().push(request.clone());
        self.pulls.lock().pop_front().unwrap_or_else(|| {
            Ok(PullResponse {
                synced_at: request.since,
                ..PullResponse::default()
            })
        })
    }

    fn push(&self, request: &PushRequest) -> RemoteResult<PushAck> {
        self.check_online()?;
        self.push_log.lock().push(request.clone());
        self.pushes.lock().pop_front().unwrap_or_else(|| {
            Ok(PushAck {
                server_version: request.expected_version.unwrap_or(0) + 1,
            })
        })
    }

    fn fetch(&self, request: &FetchRequest) -> RemoteResult<RemoteEntity> {
        self.check_online()?;
        self.fetch_log.lock().push(request.clone());
        self.fetches
            .lock()
            .pop_front()
            .unwrap_or(Err(RemoteError::NotFound))
    }
}
