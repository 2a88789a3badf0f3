//! CLI command implementations.

pub mod compact;
pub mod conflicts;
pub mod queue;
pub mod status;

use fieldsync_engine::{
    JournalEntityStore, RemoteError, RemoteResult, RemoteSyncApi, SyncConfig, SyncEngine,
};
use fieldsync_journal::DataDir;
use fieldsync_protocol::{
    FetchRequest, PullRequest, PullResponse, PushAck, PushRequest, RemoteEntity,
};
use serde::Serialize;
use std::path::Path;

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a `--format` value.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown format {other:?} (expected text or json)")),
        }
    }
}

/// Items selected by `retry` and `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One queue item.
    One(u64),
    /// Every applicable item.
    All,
}

impl Target {
    /// Builds a target from an optional id and an `--all` flag.
    pub fn from_args(id: Option<u64>, all: bool) -> Result<Self, String> {
        match (id, all) {
            (Some(id), false) => Ok(Self::One(id)),
            (None, true) => Ok(Self::All),
            _ => Err("Specify an item id or --all".to_string()),
        }
    }
}

/// A remote that is never reachable.
///
/// The CLI works on a device's data while the app is stopped, so nothing
/// here talks to the server. Conflict resolution falls back to the server
/// data recorded with the conflict.
#[derive(Debug, Default)]
pub struct OfflineRemote;

impl RemoteSyncApi for OfflineRemote {
    fn pull(&self, _request: &PullRequest) -> RemoteResult<PullResponse> {
        Err(offline())
    }

    fn push(&self, _request: &PushRequest) -> RemoteResult<PushAck> {
        Err(offline())
    }

    fn fetch(&self, _request: &FetchRequest) -> RemoteResult<RemoteEntity> {
        Err(offline())
    }
}

fn offline() -> RemoteError {
    RemoteError::Transport("offline maintenance session".into())
}

/// Engine opened over a data directory.
pub type OfflineEngine = SyncEngine<OfflineRemote, JournalEntityStore>;

/// A locked data directory and the engine reading it.
pub struct OfflineData {
    /// The engine.
    pub engine: OfflineEngine,
    _dir: DataDir,
}

/// Opens an existing data directory.
pub fn open(path: &Path) -> Result<OfflineData, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No data directory found at {:?}", path).into());
    }
    let dir = DataDir::open(path)?;
    let engine = SyncEngine::open(SyncConfig::default(), OfflineRemote, &dir)?;
    Ok(OfflineData { engine, _dir: dir })
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
