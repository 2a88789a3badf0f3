//! Pending outbound mutations.

use crate::entity::{EntityData, EntityKey};
use crate::error::{ProtocolError, ProtocolResult};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// What a mutation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Entity was created on the device.
    Create,
    /// Entity was modified on the device.
    Update,
    /// Entity was deleted on the device.
    Delete,
}

impl Action {
    /// Returns true if the action carries entity data.
    pub fn carries_payload(&self) -> bool {
        !matches!(self, Action::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// A pending outbound mutation.
///
/// At most one item exists per [`EntityKey`]; the queue enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Monotonically increasing id assigned at enqueue.
    pub id: u64,
    /// Affected entity.
    pub key: EntityKey,
    /// Mutation kind.
    pub action: Action,
    /// New entity data; `None` for deletes.
    pub payload: Option<EntityData>,
    /// Attachment on disk awaiting upload alongside this mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Failed push attempts, across cycles.
    pub retry_count: u32,
    /// Diagnostic from the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Higher values are pushed first.
    pub priority: i32,
    /// Enqueue time; tiebreaker among equal priorities.
    pub created_at: Timestamp,
    /// Version the push asserts; `None` means use the cached record's server version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl QueueItem {
    /// Checks that `payload` is consistent with `action` and `key`.
    ///
    /// Creates and updates must carry data of the key's kind; deletes carry none.
    pub fn validate_mutation(
        key: &EntityKey,
        action: Action,
        payload: Option<&EntityData>,
    ) -> ProtocolResult<()> {
        if key.id.trim().is_empty() {
            return Err(ProtocolError::invalid("entity_id", "must not be empty"));
        }
        match (action.carries_payload(), payload) {
            (true, None) => Err(ProtocolError::invalid(
                "payload",
                format!("{action} of {key} requires entity data"),
            )),
            (false, Some(_)) => Err(ProtocolError::invalid(
                "payload",
                format!("delete of {key} must not carry entity data"),
            )),
            (true, Some(data)) if data.kind() != key.kind => Err(ProtocolError::invalid(
                "payload",
                format!("{} data cannot describe {key}", data.kind()),
            )),
            _ => Ok(()),
        }
    }

    /// Returns true if the item is still eligible for dequeue.
    pub fn is_active(&self, retry_cap: u32) -> bool {
        self.retry_count < retry_cap
    }

    /// Dequeue order: priority descending, then creation time, then id.
    pub fn dequeue_order(a: &QueueItem, b: &QueueItem) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, Job, JobStatus, Photo};

    fn job_data() -> EntityData {
        Job::with_status(JobStatus::InProgress).into()
    }

    fn item(id: u64, priority: i32, created_at: Timestamp) -> QueueItem {
        QueueItem {
            id,
            key: EntityKey::job(format!("job-{id}")),
            action: Action::Update,
            payload: Some(job_data()),
            file_path: None,
            retry_count: 0,
            last_error: None,
            priority,
            created_at,
            expected_version: None,
        }
    }

    #[test]
    fn update_requires_matching_payload() {
        let key = EntityKey::job("job-1");
        assert!(QueueItem::validate_mutation(&key, Action::Update, Some(&job_data())).is_ok());
        assert!(QueueItem::validate_mutation(&key, Action::Update, None).is_err());

        let photo: EntityData = Photo {
            job_id: "job-1".into(),
            caption: None,
            content_type: "image/jpeg".into(),
            captured_at: 1,
        }
        .into();
        let err = QueueItem::validate_mutation(&key, Action::Create, Some(&photo)).unwrap_err();
        assert!(err.to_string().contains("photo data cannot describe job/job-1"));
    }

    #[test]
    fn delete_carries_no_payload() {
        let key = EntityKey::new(EntityKind::Photo, "p-1");
        assert!(QueueItem::validate_mutation(&key, Action::Delete, None).is_ok());
        assert!(QueueItem::validate_mutation(&key, Action::Delete, Some(&job_data())).is_err());
    }

    #[test]
    fn empty_entity_id_is_rejected() {
        let key = EntityKey::job("  ");
        assert!(QueueItem::validate_mutation(&key, Action::Delete, None).is_err());
    }

    #[test]
    fn dequeue_order_prefers_priority_then_age() {
        let mut items = vec![item(1, 0, 10), item(2, 10, 30), item(3, 5, 20), item(4, 10, 5)];
        items.sort_by(QueueItem::dequeue_order);
        let ids: Vec<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn equal_timestamps_fall_back_to_id() {
        let mut items = vec![item(9, 0, 100), item(3, 0, 100)];
        items.sort_by(QueueItem::dequeue_order);
        assert_eq!(items[0].id, 3);
    }
}
