//! # FieldSync Engine
//!
//! Offline-first sync engine for field technician devices.
//!
//! This crate provides:
//! - A durable, deduplicated, prioritized mutation queue
//! - A local entity store with dirty tracking and server versions
//! - The pull-then-push reconciliation engine
//! - Conflict resolution (server-wins or manual)
//! - A transport policy with bounded backoff on rate limits
//! - An HTTP remote abstraction and a background sync service
//!
//! ## Architecture
//!
//! Every local write goes to the store and the queue first; the network is
//! never on the write path. A cycle then:
//! 1. Pulls server changes since the cursor (server is authoritative, but a
//!    dirty local record is not overwritten by a stale pull)
//! 2. Pushes queued mutations in priority order, in bounded batches
//! 3. Resolves version conflicts per the configured policy
//!
//! ## Key Invariants
//!
//! - At most one queued mutation per entity
//! - At most one cycle at a time
//! - A mutation stops being retried after [`RETRY_CAP`] failures
//! - A conflicting mutation is never retried as-is
//! - Queue, store, cursor and conflict state survive restarts

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod http;
mod policy;
mod queue;
mod remote;
mod service;
mod state;
mod store;

/// Engine crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{
    RetryConfig, SyncConfig, DEFAULT_COMPACTION_THRESHOLD, DEFAULT_MAX_PUSH_BATCHES,
    DEFAULT_PUSH_BATCH,
};
pub use conflict::{
    ConflictChooser, ConflictDecision, ConflictLog, ConflictResolver, DeferToUser,
    ResolutionOutcome, ResolveContext, ServerState, KEEP_LOCAL_PRIORITY_BOOST,
};
pub use engine::{StatusListener, SyncEngine};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use http::{
    error_from_reply, HttpClient, HttpRemote, HttpReply, LoopbackClient, LoopbackServer,
    FETCH_PATH, PULL_PATH, PUSH_PATH,
};
pub use policy::{PushOutcome, RecordingSleeper, Sleeper, ThreadSleeper, TransportPolicy};
pub use queue::{Mutation, MutationQueue, RETRY_CAP};
pub use remote::{MockRemote, RemoteSyncApi};
pub use service::{ConnectivityMonitor, ConnectivityTransition, SyncService};
pub use state::{CycleReport, SyncState, SyncStats, SyncStatus, Trigger};
pub use store::{
    JournalEntityStore, LocalEntityStore, MemoryEntityStore, SyncMeta, UpsertOutcome,
    UpsertSource,
};
