//! Server-side versioned entity table.

use crate::error::{ServerError, ServerResult};
use fieldsync_protocol::{
    now_millis, Action, EntityData, EntityKey, PullRequest, PullResponse, PushAck, PushRequest,
    QueueItem, RemoteEntity, Timestamp,
};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Stored {
    /// `None` marks a tombstone.
    data: Option<EntityData>,
    version: u64,
    changed_at: Timestamp,
}

#[derive(Debug, Default)]
struct Inner {
    entities: HashMap<EntityKey, Stored>,
    clock: Timestamp,
}

impl Inner {
    /// Next change timestamp, strictly greater than every earlier one.
    fn tick(&mut self) -> Timestamp {
        self.clock = now_millis().max(self.clock + 1);
        self.clock
    }

    fn write(&mut self, key: &EntityKey, data: Option<EntityData>, version: u64) {
        let changed_at = self.tick();
        self.entities.insert(
            key.clone(),
            Stored {
                data,
                version,
                changed_at,
            },
        );
    }
}

/// The authoritative copy of every entity.
///
/// The server maintains:
/// - The current data and version of each entity
/// - Tombstones for deleted entities, so pulls can report deletions
/// - A change clock used as the pull cursor
#[derive(Debug, Default)]
pub struct ServerStore {
    inner: RwLock<Inner>,
}

impl ServerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live entity for `key`.
    pub fn get(&self, key: &EntityKey) -> Option<RemoteEntity> {
        let inner = self.inner.read();
        let stored = inner.entities.get(key)?;
        stored.data.clone().map(|data| RemoteEntity {
            key: key.clone(),
            data,
            version: stored.version,
        })
    }

    /// Returns the current version of `key`, tombstones included.
    pub fn version_of(&self, key: &EntityKey) -> Option<u64> {
        self.inner.read().entities.get(key).map(|s| s.version)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .entities
            .values()
            .filter(|s| s.data.is_some())
            .count()
    }

    /// Returns true if no live entity exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest change timestamp.
    pub fn high_water(&self) -> Timestamp {
        self.inner.read().clock
    }

    /// Applies one client mutation under optimistic concurrency.
    pub fn apply(&self, request: &PushRequest) -> ServerResult<PushAck> {
        QueueItem::validate_mutation(&request.key, request.action, request.payload.as_ref())
            .map_err(|e| ServerError::Rejected(e.to_string()))?;

        let mut inner = self.inner.write();
        let current = inner.entities.get(&request.key).cloned();

        let version = match (current, request.action) {
            (None, Action::Create) => 1,
            (None, Action::Update) => {
                return Err(ServerError::NotFound(request.key.to_string()));
            }
            // Already gone; nothing to record.
            (None, Action::Delete) => return Ok(PushAck { server_version: 0 }),

            (Some(tomb), action) if tomb.data.is_none() => match action {
                Action::Create => tomb.version + 1,
                Action::Update => {
                    return Err(ServerError::Conflict {
                        version: tomb.version,
                        data: None,
                    });
                }
                Action::Delete => {
                    return Ok(PushAck {
                        server_version: tomb.version,
                    });
                }
            },

            (Some(live), _) => {
                if request.expected_version != Some(live.version) {
                    return Err(ServerError::Conflict {
                        version: live.version,
                        data: live.data,
                    });
                }
                live.version + 1
            }
        };

        let data = match request.action {
            Action::Delete => None,
            Action::Create | Action::Update => request.payload.clone(),
        };
        inner.write(&request.key, data, version);
        Ok(PushAck {
            server_version: version,
        })
    }

    /// Writes `data` unconditionally, as a back-office edit would. Returns the new version.
    pub fn put(&self, key: &EntityKey, data: EntityData) -> u64 {
        let mut inner = self.inner.write();
        let version = inner.entities.get(key).map_or(1, |s| s.version + 1);
        inner.write(key, Some(data), version);
        version
    }

    /// Deletes `key` unconditionally. Returns false if it was not live.
    pub fn remove(&self, key: &EntityKey) -> bool {
        let mut inner = self.inner.write();
        let version = match inner.entities.get(key) {
            Some(stored) if stored.data.is_some() => stored.version + 1,
            _ => return false,
        };
        inner.write(key, None, version);
        true
    }

    /// Changes after `request.since`, oldest first, at most `limit` of them.
    pub fn changes_since(&self, request: &PullRequest, limit: usize) -> PullResponse {
        let inner = self.inner.read();
        let mut changed: Vec<(&EntityKey, &Stored)> = inner
            .entities
            .iter()
            .filter(|(key, stored)| stored.changed_at > request.since && request.wants(key.kind))
            .collect();
        changed.sort_by_key(|(_, stored)| stored.changed_at);

        let has_more = changed.len() > limit;
        changed.truncate(limit);

        let synced_at = if has_more {
            changed
                .last()
                .map_or(request.since, |(_, stored)| stored.changed_at)
        } else {
            inner.clock.max(request.since)
        };

        let mut response = PullResponse {
            synced_at,
            has_more,
            ..PullResponse::default()
        };
        for (key, stored) in changed {
            match &stored.data {
                Some(data) => response.updated.push(RemoteEntity {
                    key: key.clone(),
                    data: data.clone(),
                    version: stored.version,
                }),
                None => response.deleted.push(key.clone()),
            }
        }
        response
    }
}
