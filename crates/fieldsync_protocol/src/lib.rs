//! # FieldSync Protocol
//!
//! Data model and wire messages shared by the FieldSync engine and server.
//!
//! This crate provides:
//! - [`EntityKind`], [`EntityKey`] and the typed [`EntityData`] union
//! - [`QueueItem`] for pending outbound mutations
//! - [`LocalEntityRecord`] for cached entities with version bookkeeping
//! - [`ConflictRecord`] for manual conflict resolution
//! - Pull / push / fetch messages with CBOR encoding
//!
//! This is a pure data crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod messages;
mod queue;
mod record;

pub use conflict::{ConflictPolicy, ConflictRecord, ConflictResolution};
pub use entity::{
    ChecklistResponse, ChecklistValue, EntityData, EntityKey, EntityKind, Job, JobStatus, Photo,
    Signature,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, ErrorBody, ErrorCode, FetchRequest, PullRequest, PullResponse, PushAck,
    PushRequest, RemoteEntity,
};
pub use queue::{Action, QueueItem};
pub use record::LocalEntityRecord;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Returns the current wall-clock time as a [`Timestamp`].
pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
