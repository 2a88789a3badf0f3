//! Cached entity records with version bookkeeping.

use crate::entity::{EntityData, EntityKey};
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Device-side copy of a domain entity.
///
/// # Invariants
///
/// - `local_version` increments on every local mutation
/// - `is_dirty` is true while local data diverges from the last confirmed server state
/// - A dirty record is only overwritten by a pull when the incoming version is
///   strictly greater than `server_version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntityRecord {
    /// Entity identity.
    pub key: EntityKey,
    /// Current entity data.
    pub data: EntityData,
    /// Last version confirmed by the server; `None` if never synced.
    pub server_version: Option<u64>,
    /// Local mutation counter.
    pub local_version: u64,
    /// True when the record has unconfirmed local changes.
    pub is_dirty: bool,
    /// Last reconciliation that touched this record.
    pub last_synced_at: Option<Timestamp>,
}

impl LocalEntityRecord {
    /// A record produced by a local mutation that has never been synced.
    pub fn local(key: EntityKey, data: EntityData) -> Self {
        Self {
            key,
            data,
            server_version: None,
            local_version: 1,
            is_dirty: true,
            last_synced_at: None,
        }
    }

    /// A clean record as delivered by the server.
    pub fn from_server(key: EntityKey, data: EntityData, version: u64, at: Timestamp) -> Self {
        Self {
            key,
            data,
            server_version: Some(version),
            local_version: 0,
            is_dirty: false,
            last_synced_at: Some(at),
        }
    }

    /// Decides whether a pulled version may replace this record.
    ///
    /// Clean records always accept server data. Dirty records accept it only
    /// when the server has advanced past the version they were edited against.
    pub fn accepts_pull(&self, incoming_version: u64) -> bool {
        if !self.is_dirty {
            return true;
        }
        match self.server_version {
            Some(known) => incoming_version > known,
            None => true,
        }
    }

    /// Applies a local edit.
    pub fn apply_local(&mut self, data: EntityData) {
        self.data = data;
        self.local_version += 1;
        self.is_dirty = true;
    }

    /// Replaces the record with authoritative server state.
    pub fn apply_server(&mut self, data: EntityData, version: u64, at: Timestamp) {
        self.data = data;
        self.server_version = Some(version);
        self.is_dirty = false;
        self.last_synced_at = Some(at);
    }
}
