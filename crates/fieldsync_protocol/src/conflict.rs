//! Conflict records and resolution policy.

use crate::entity::{EntityData, EntityKey};
use crate::queue::Action;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How push conflicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fetch the authoritative entity and overwrite the local copy.
    #[default]
    ServerWins,
    /// Record the conflict and let a chooser decide.
    Manual,
}

/// The side chosen for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the device's data and push it again.
    Local,
    /// Adopt the server's data.
    Server,
    /// Field-level merge. Reserved; never applied.
    Merged,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictResolution::Local => "local",
            ConflictResolution::Server => "server",
            ConflictResolution::Merged => "merged",
        })
    }
}

/// A push conflict awaiting (or having received) a manual decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique id (UUID v4).
    pub id: String,
    /// Conflicting entity.
    pub key: EntityKey,
    /// Action the rejected mutation carried.
    pub action: Action,
    /// Priority of the rejected mutation.
    pub priority: i32,
    /// Device data at the time of the conflict; `None` for deletes.
    pub local_data: Option<EntityData>,
    /// Server data reported with the conflict, if any.
    pub server_data: Option<EntityData>,
    /// Server version reported with the conflict.
    pub server_version: u64,
    /// True once a resolution was applied.
    pub resolved: bool,
    /// The applied resolution.
    pub resolution: Option<ConflictResolution>,
    /// Detection time.
    pub detected_at: Timestamp,
}

impl ConflictRecord {
    /// Creates an unresolved record with a fresh id.
    pub fn new(
        key: EntityKey,
        action: Action,
        priority: i32,
        local_data: Option<EntityData>,
        server_data: Option<EntityData>,
        server_version: u64,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            action,
            priority,
            local_data,
            server_data,
            server_version,
            resolved: false,
            resolution: None,
            detected_at,
        }
    }

    /// Marks the record resolved.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolved = true;
        self.resolution = Some(resolution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Job, JobStatus};

    #[test]
    fn new_record_is_unresolved_with_unique_id() {
        let make = || {
            ConflictRecord::new(
                EntityKey::job("job-1"),
                Action::Update,
                0,
                Some(Job::with_status(JobStatus::Completed).into()),
                None,
                4,
                10,
            )
        };
        let a = make();
        let b = make();
        assert!(!a.resolved);
        assert!(a.resolution.is_none());
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn resolve_records_choice() {
        let mut record =
            ConflictRecord::new(EntityKey::job("job-1"), Action::Delete, 0, None, None, 2, 10);
        record.resolve(ConflictResolution::Server);
        assert!(record.resolved);
        assert_eq!(record.resolution, Some(ConflictResolution::Server));
    }

    #[test]
    fn default_policy_is_server_wins() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::ServerWins);
    }
}
