//! Durable, deduplicated mutation queue.
//!
//! Every state change is appended to a journal before memory is touched, so
//! a crash at any point leaves a queue that replays to the last completed
//! operation. At most one item exists per entity: enqueuing a mutation for
//! an entity that already has a pending item replaces that item.

use crate::config::DEFAULT_COMPACTION_THRESHOLD;
use crate::error::{SyncError, SyncResult};
use fieldsync_journal::{Journal, JournalBackend, MemoryBackend};
use fieldsync_protocol::{now_millis, Action, EntityData, EntityKey, QueueItem};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Failed attempts after which an item stops being dequeued.
pub const RETRY_CAP: u32 = 3;

/// A local mutation about to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Affected entity.
    pub key: EntityKey,
    /// Mutation kind.
    pub action: Action,
    /// New data; `None` for deletes.
    pub payload: Option<EntityData>,
    /// Attachment awaiting upload.
    pub file_path: Option<String>,
    /// Higher values are pushed first.
    pub priority: i32,
    /// Version the push should assert instead of the cached one.
    pub expected_version: Option<u64>,
}

impl Mutation {
    /// A mutation with the given action and payload at priority 0.
    pub fn new(key: EntityKey, action: Action, payload: Option<EntityData>) -> Self {
        Self {
            key,
            action,
            payload,
            file_path: None,
            priority: 0,
            expected_version: None,
        }
    }

    /// A create mutation.
    pub fn create(key: EntityKey, data: impl Into<EntityData>) -> Self {
        Self::new(key, Action::Create, Some(data.into()))
    }

    /// An update mutation.
    pub fn update(key: EntityKey, data: impl Into<EntityData>) -> Self {
        Self::new(key, Action::Update, Some(data.into()))
    }

    /// A delete mutation.
    pub fn delete(key: EntityKey) -> Self {
        Self::new(key, Action::Delete, None)
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a file awaiting upload.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets the version the push asserts.
    pub fn with_expected_version(mut self, version: Option<u64>) -> Self {
        self.expected_version = version;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum QueueRecord {
    Watermark { next_id: u64 },
    Enqueued { item: QueueItem, replaced: Option<u64> },
    Removed { id: u64 },
    Failed { id: u64, retry_count: u32, error: String },
    Reset { id: u64 },
    Cleared,
}

struct QueueInner {
    journal: Journal<Box<dyn JournalBackend>>,
    items: BTreeMap<u64, QueueItem>,
    by_key: HashMap<EntityKey, u64>,
    next_id: u64,
}

impl QueueInner {
    fn apply(&mut self, record: QueueRecord) {
        match record {
            QueueRecord::Watermark { next_id } => {
                self.next_id = self.next_id.max(next_id);
            }
            QueueRecord::Enqueued { item, replaced } => {
                if let Some(old) = replaced {
                    self.drop_item(old);
                }
                if let Some(existing) = self.by_key.get(&item.key).copied() {
                    self.drop_item(existing);
                }
                self.next_id = self.next_id.max(item.id + 1);
                self.by_key.insert(item.key.clone(), item.id);
                self.items.insert(item.id, item);
            }
            QueueRecord::Removed { id } => {
                self.drop_item(id);
            }
            QueueRecord::Failed {
                id,
                retry_count,
                error,
            } => {
                if let Some(item) = self.items.get_mut(&id) {
                    item.retry_count = retry_count;
                    item.last_error = Some(error);
                }
            }
            QueueRecord::Reset { id } => {
                if let Some(item) = self.items.get_mut(&id) {
                    item.retry_count = 0;
                    item.last_error = None;
                }
            }
            QueueRecord::Cleared => {
                self.items.clear();
                self.by_key.clear();
            }
        }
    }

    fn drop_item(&mut self, id: u64) -> Option<QueueItem> {
        let item = self.items.remove(&id)?;
        self.by_key.remove(&item.key);
        Some(item)
    }

    /// Journals `record`, then applies it.
    fn commit(&mut self, record: QueueRecord) -> SyncResult<()> {
        self.journal.append_record(&record)?;
        self.apply(record);
        Ok(())
    }

    fn dead_records(&self) -> usize {
        self.journal.record_count().saturating_sub(self.items.len() + 1)
    }

    fn compact(&mut self) -> SyncResult<()> {
        let mut records = Vec::with_capacity(self.items.len() + 1);
        records.push(QueueRecord::Watermark {
            next_id: self.next_id,
        });
        records.extend(self.items.values().map(|item| QueueRecord::Enqueued {
            item: item.clone(),
            replaced: None,
        }));
        self.journal.rewrite(records.iter())?;
        Ok(())
    }

    fn sorted(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.items.values().cloned().collect();
        items.sort_by(QueueItem::dequeue_order);
        items
    }
}

/// Durable, ordered, deduplicated list of pending outbound changes.
///
/// # Invariants
///
/// - At most one item per [`EntityKey`]
/// - Ids are strictly increasing, also across reopen and compaction
/// - Items at [`RETRY_CAP`] failures stay in the queue but are not dequeued
/// - The queue never talks to the network
pub struct MutationQueue {
    inner: Mutex<QueueInner>,
    compaction_threshold: usize,
}

impl MutationQueue {
    /// Opens a queue over `backend`, replaying its journal.
    pub fn open(backend: impl JournalBackend + 'static) -> SyncResult<Self> {
        let backend: Box<dyn JournalBackend> = Box::new(backend);
        let (journal, records) = Journal::open::<QueueRecord>(backend)?;

        let mut inner = QueueInner {
            journal,
            items: BTreeMap::new(),
            by_key: HashMap::new(),
            next_id: 1,
        };
        for record in records {
            inner.apply(record);
        }
        debug!(items = inner.items.len(), next_id = inner.next_id, "mutation queue opened");

        Ok(Self {
            inner: Mutex::new(inner),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        })
    }

    /// Creates an empty, non-durable queue.
    pub fn in_memory() -> SyncResult<Self> {
        Self::open(MemoryBackend::new())
    }

    /// Sets how many dead journal records trigger automatic compaction.
    #[must_use]
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Queues a mutation, replacing any pending item for the same entity.
    ///
    /// Returns the id of the new item.
    pub fn enqueue(&self, mutation: Mutation) -> SyncResult<u64> {
        QueueItem::validate_mutation(&mutation.key, mutation.action, mutation.payload.as_ref())
            .map_err(|e| SyncError::InvalidMutation(e.to_string()))?;

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        let replaced = inner.by_key.get(&mutation.key).copied();
        let item = QueueItem {
            id,
            key: mutation.key,
            action: mutation.action,
            payload: mutation.payload,
            file_path: mutation.file_path,
            retry_count: 0,
            last_error: None,
            priority: mutation.priority,
            created_at: now_millis(),
            expected_version: mutation.expected_version,
        };

        debug!(
            id,
            entity = %item.key,
            action = %item.action,
            priority = item.priority,
            replaced = ?replaced,
            "mutation enqueued"
        );
        inner.commit(QueueRecord::Enqueued { item, replaced })?;
        self.maybe_compact(&mut inner)?;
        Ok(id)
    }

    /// Returns up to `limit` active items, highest priority first, then oldest.
    ///
    /// Items are not removed.
    pub fn next_batch(&self, limit: usize) -> Vec<QueueItem> {
        let inner = self.inner.lock();
        let mut active: Vec<QueueItem> = inner
            .items
            .values()
            .filter(|item| item.is_active(RETRY_CAP))
            .cloned()
            .collect();
        active.sort_by(QueueItem::dequeue_order);
        active.truncate(limit);
        active
    }

    /// Removes an item after a successful push. Returns false if it was already gone.
    pub fn mark_success(&self, id: u64) -> SyncResult<bool> {
        self.remove(id)
    }

    /// Removes an item. Returns false if it was already gone.
    pub fn remove(&self, id: u64) -> SyncResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.items.contains_key(&id) {
            return Ok(false);
        }
        inner.commit(QueueRecord::Removed { id })?;
        self.maybe_compact(&mut inner)?;
        Ok(true)
    }

    /// Records a failed push attempt.
    pub fn mark_failed(&self, id: u64, error: impl Into<String>) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let retry_count = inner
            .items
            .get(&id)
            .map(|item| item.retry_count.saturating_add(1))
            .ok_or(SyncError::UnknownItem(id))?;
        let error = error.into();

        if retry_count >= RETRY_CAP {
            info!(id, retry_count, error = %error, "queue item reached retry cap");
        } else {
            debug!(id, retry_count, error = %error, "queue item failed");
        }
        inner.commit(QueueRecord::Failed {
            id,
            retry_count,
            error,
        })?;
        self.maybe_compact(&mut inner)
    }

    /// Makes an item eligible for dequeue again.
    pub fn reset_for_retry(&self, id: u64) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if !inner.items.contains_key(&id) {
            return Err(SyncError::UnknownItem(id));
        }
        inner.commit(QueueRecord::Reset { id })?;
        self.maybe_compact(&mut inner)
    }

    /// Resets every item at the retry cap. Returns how many were reset.
    pub fn reset_all_failed(&self) -> SyncResult<usize> {
        let mut inner = self.inner.lock();
        let failed: Vec<u64> = inner
            .items
            .values()
            .filter(|item| !item.is_active(RETRY_CAP))
            .map(|item| item.id)
            .collect();
        for id in &failed {
            inner.commit(QueueRecord::Reset { id: *id })?;
        }
        self.maybe_compact(&mut inner)?;
        Ok(failed.len())
    }

    /// Removes every item. Returns how many were removed.
    pub fn clear(&self) -> SyncResult<usize> {
        let mut inner = self.inner.lock();
        let removed = inner.items.len();
        if removed > 0 {
            inner.commit(QueueRecord::Cleared)?;
            self.maybe_compact(&mut inner)?;
        }
        Ok(removed)
    }

    /// Total items regardless of retry state.
    pub fn count(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Items at the retry cap, in dequeue order.
    pub fn failed_items(&self) -> Vec<QueueItem> {
        let inner = self.inner.lock();
        inner
            .sorted()
            .into_iter()
            .filter(|item| !item.is_active(RETRY_CAP))
            .collect()
    }

    /// Every item, in dequeue order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.inner.lock().sorted()
    }

    /// Looks up an item by id.
    pub fn get(&self, id: u64) -> Option<QueueItem> {
        self.inner.lock().items.get(&id).cloned()
    }

    /// Returns the pending item for an entity, if any.
    pub fn item_for(&self, key: &EntityKey) -> Option<QueueItem> {
        let inner = self.inner.lock();
        let id = inner.by_key.get(key)?;
        inner.items.get(id).cloned()
    }

    /// Number of records in the backing journal.
    pub fn journal_records(&self) -> usize {
        self.inner.lock().journal.record_count()
    }

    /// Rewrites the journal as a snapshot of live items.
    pub fn compact(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let before = inner.journal.record_count();
        inner.compact()?;
        info!(
            before,
            after = inner.journal.record_count(),
            "mutation queue compacted"
        );
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut QueueInner) -> SyncResult<()> {
        if inner.dead_records() > self.compaction_threshold {
            debug!(dead = inner.dead_records(), "compacting mutation queue");
            inner.compact()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MutationQueue")
            .field("items", &inner.items.len())
            .field("next_id", &inner.next_id)
            .finish()
    }
}
