//! Local entity store.
//!
//! The engine reads and writes cached entities through [`LocalEntityStore`].
//! Each call is one transaction: implementations serialize all access behind
//! a single lock so a pull merge can never interleave with a local edit of
//! the same record.

use crate::config::DEFAULT_COMPACTION_THRESHOLD;
use crate::error::SyncResult;
use fieldsync_journal::{Journal, JournalBackend, MemoryBackend};
use fieldsync_protocol::{now_millis, EntityData, EntityKey, LocalEntityRecord, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Where an upsert comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertSource {
    /// A local edit; marks the record dirty.
    Local,
    /// A pulled server version; subject to the dirty-wins rule.
    Server(u64),
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was written.
    Applied,
    /// A dirty record was kept because the server version was not newer.
    SkippedDirty,
}

/// Durable keyed storage for cached entities plus the pull cursor.
pub trait LocalEntityStore: Send + Sync {
    /// Returns the record for `key`.
    fn get(&self, key: &EntityKey) -> SyncResult<Option<LocalEntityRecord>>;

    /// Writes entity data.
    ///
    /// Local writes bump `local_version` and set `is_dirty`. Server writes
    /// replace clean records unconditionally and dirty records only when the
    /// incoming version is strictly greater than `server_version`.
    fn upsert(
        &self,
        key: &EntityKey,
        data: EntityData,
        source: UpsertSource,
    ) -> SyncResult<UpsertOutcome>;

    /// Removes a record. Returns false if it did not exist.
    fn delete(&self, key: &EntityKey) -> SyncResult<bool>;

    /// Records with unconfirmed local changes.
    fn list_dirty(&self) -> SyncResult<Vec<LocalEntityRecord>>;

    /// Every cached record.
    fn list(&self) -> SyncResult<Vec<LocalEntityRecord>>;

    /// Confirms a pushed write: records `server_version` and clears `is_dirty`.
    fn mark_synced(&self, key: &EntityKey, server_version: u64) -> SyncResult<()>;

    /// Replaces a record with server state regardless of its dirty flag.
    fn overwrite_from_server(
        &self,
        key: &EntityKey,
        data: EntityData,
        version: u64,
    ) -> SyncResult<()>;

    /// Updates the known server version without touching data or dirty state.
    fn set_server_version(&self, key: &EntityKey, version: u64) -> SyncResult<()>;

    /// Timestamp of the last fully applied pull.
    fn cursor(&self) -> SyncResult<Timestamp>;

    /// Moves the cursor forward. Returns false if `to` is not ahead.
    fn advance_cursor(&self, to: Timestamp) -> SyncResult<bool>;

    /// Time of the last successful reconciliation.
    fn last_synced_at(&self) -> SyncResult<Option<Timestamp>>;
}

/// Cursor and last-synced bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Pull cursor.
    pub cursor: Timestamp,
    /// Last successful reconciliation.
    pub last_synced_at: Option<Timestamp>,
}

/// A pending change to an [`EntityTable`], journaled before it is applied.
enum Change {
    Put(LocalEntityRecord),
    Remove(EntityKey),
    Meta(SyncMeta),
}

/// The in-memory state shared by both store implementations.
///
/// Operations only plan changes; [`EntityTable::apply`] makes them visible.
#[derive(Debug, Default)]
struct EntityTable {
    records: BTreeMap<EntityKey, LocalEntityRecord>,
    meta: SyncMeta,
}

impl EntityTable {
    fn upsert(
        &self,
        key: &EntityKey,
        data: EntityData,
        source: UpsertSource,
        now: Timestamp,
    ) -> (UpsertOutcome, Vec<Change>) {
        let record = match (self.records.get(key), source) {
            (Some(existing), UpsertSource::Local) => {
                let mut record = existing.clone();
                record.apply_local(data);
                record
            }
            (Some(existing), UpsertSource::Server(version)) => {
                if !existing.accepts_pull(version) {
                    debug!(
                        entity = %key,
                        incoming = version,
                        known = ?existing.server_version,
                        "kept dirty record"
                    );
                    return (UpsertOutcome::SkippedDirty, Vec::new());
                }
                let mut record = existing.clone();
                record.apply_server(data, version, now);
                record
            }
            (None, UpsertSource::Local) => LocalEntityRecord::local(key.clone(), data),
            (None, UpsertSource::Server(version)) => {
                LocalEntityRecord::from_server(key.clone(), data, version, now)
            }
        };
        (UpsertOutcome::Applied, vec![Change::Put(record)])
    }

    fn delete(&self, key: &EntityKey) -> Option<Change> {
        self.records
            .contains_key(key)
            .then(|| Change::Remove(key.clone()))
    }

    fn touch(&self, now: Timestamp) -> Change {
        Change::Meta(SyncMeta {
            last_synced_at: Some(now),
            ..self.meta
        })
    }

    fn mark_synced(&self, key: &EntityKey, version: u64, now: Timestamp) -> Vec<Change> {
        let mut changes = Vec::new();
        if let Some(existing) = self.records.get(key) {
            let mut record = existing.clone();
            record.server_version = Some(version);
            record.is_dirty = false;
            record.last_synced_at = Some(now);
            changes.push(Change::Put(record));
        }
        changes.push(self.touch(now));
        changes
    }

    fn overwrite(&self, key: &EntityKey, data: EntityData, version: u64, now: Timestamp) -> Change {
        let record = match self.records.get(key) {
            Some(existing) => {
                let mut record = existing.clone();
                record.apply_server(data, version, now);
                record
            }
            None => LocalEntityRecord::from_server(key.clone(), data, version, now),
        };
        Change::Put(record)
    }

    fn set_server_version(&self, key: &EntityKey, version: u64) -> Option<Change> {
        let mut record = self.records.get(key)?.clone();
        record.server_version = Some(version);
        Some(Change::Put(record))
    }

    /// A pull that does not move the cursor still counts as a reconciliation.
    fn advance_cursor(&self, to: Timestamp, now: Timestamp) -> (bool, Change) {
        if to <= self.meta.cursor {
            return (false, self.touch(now));
        }
        let meta = SyncMeta {
            cursor: to,
            last_synced_at: Some(now),
        };
        (true, Change::Meta(meta))
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Put(record) => {
                self.records.insert(record.key.clone(), record);
            }
            Change::Remove(key) => {
                self.records.remove(&key);
            }
            Change::Meta(meta) => self.meta = meta,
        }
    }

    fn apply_all(&mut self, changes: Vec<Change>) {
        for change in changes {
            self.apply(change);
        }
    }

    fn dirty(&self) -> Vec<LocalEntityRecord> {
        self.records
            .values()
            .filter(|record| record.is_dirty)
            .cloned()
            .collect()
    }
}

/// Non-durable store for tests and previews.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    table: Mutex<EntityTable>,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.table.lock().records.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalEntityStore for MemoryEntityStore {
    fn get(&self, key: &EntityKey) -> SyncResult<Option<LocalEntityRecord>> {
        Ok(self.table.lock().records.get(key).cloned())
    }

    fn upsert(
        &self,
        key: &EntityKey,
        data: EntityData,
        source: UpsertSource,
    ) -> SyncResult<UpsertOutcome> {
        let mut table = self.table.lock();
        let (outcome, changes) = table.upsert(key, data, source, now_millis());
        table.apply_all(changes);
        Ok(outcome)
    }

    fn delete(&self, key: &EntityKey) -> SyncResult<bool> {
        let mut table = self.table.lock();
        let change = table.delete(key);
        let existed = change.is_some();
        table.apply_all(change.into_iter().collect());
        Ok(existed)
    }

    fn list_dirty(&self) -> SyncResult<Vec<LocalEntityRecord>> {
        Ok(self.table.lock().dirty())
    }

    fn list(&self) -> SyncResult<Vec<LocalEntityRecord>> {
        Ok(self.table.lock().records.values().cloned().collect())
    }

    fn mark_synced(&self, key: &EntityKey, server_version: u64) -> SyncResult<()> {
        let mut table = self.table.lock();
        let changes = table.mark_synced(key, server_version, now_millis());
        table.apply_all(changes);
        Ok(())
    }

    fn overwrite_from_server(
        &self,
        key: &EntityKey,
        data: EntityData,
        version: u64,
    ) -> SyncResult<()> {
        let mut table = self.table.lock();
        let change = table.overwrite(key, data, version, now_millis());
        table.apply(change);
        Ok(())
    }

    fn set_server_version(&self, key: &EntityKey, version: u64) -> SyncResult<()> {
        let mut table = self.table.lock();
        if let Some(change) = table.set_server_version(key, version) {
            table.apply(change);
        }
        Ok(())
    }

    fn cursor(&self) -> SyncResult<Timestamp> {
        Ok(self.table.lock().meta.cursor)
    }

    fn advance_cursor(&self, to: Timestamp) -> SyncResult<bool> {
        let mut table = self.table.lock();
        let (advanced, change) = table.advance_cursor(to, now_millis());
        table.apply(change);
        Ok(advanced)
    }

    fn last_synced_at(&self) -> SyncResult<Option<Timestamp>> {
        Ok(self.table.lock().meta.last_synced_at)
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum EntityRecord {
    Put(LocalEntityRecord),
    Remove(EntityKey),
}

struct Journaled {
    table: EntityTable,
    entities: Journal<Box<dyn JournalBackend>>,
    meta: Journal<Box<dyn JournalBackend>>,
}

impl Journaled {
    /// Journals each change, then applies it. A failed append leaves the
    /// table matching what is on disk.
    fn commit(&mut self, changes: Vec<Change>) -> SyncResult<()> {
        for change in changes {
            match &change {
                Change::Put(record) => self
                    .entities
                    .append_record(&EntityRecord::Put(record.clone()))?,
                Change::Remove(key) => self
                    .entities
                    .append_record(&EntityRecord::Remove(key.clone()))?,
                Change::Meta(meta) => self.meta.append_record(meta)?,
            }
            self.table.apply(change);
        }
        Ok(())
    }
}

/// Durable store backed by two journals: entity records and sync metadata.
///
/// Entity changes are appended as `Put` / `Remove` records; metadata is
/// appended as full snapshots and the last one wins on replay.
pub struct JournalEntityStore {
    inner: Mutex<Journaled>,
    compaction_threshold: usize,
}

impl JournalEntityStore {
    /// Opens a store over an entity journal and a metadata journal.
    pub fn open(
        entities: impl JournalBackend + 'static,
        meta: impl JournalBackend + 'static,
    ) -> SyncResult<Self> {
        let entities: Box<dyn JournalBackend> = Box::new(entities);
        let meta: Box<dyn JournalBackend> = Box::new(meta);
        let (entities, entity_records) = Journal::open::<EntityRecord>(entities)?;
        let (meta, meta_records) = Journal::open::<SyncMeta>(meta)?;

        let mut table = EntityTable::default();
        for record in entity_records {
            table.apply(match record {
                EntityRecord::Put(record) => Change::Put(record),
                EntityRecord::Remove(key) => Change::Remove(key),
            });
        }
        if let Some(last) = meta_records.last() {
            table.apply(Change::Meta(*last));
        }
        debug!(
            records = table.records.len(),
            cursor = table.meta.cursor,
            "entity store opened"
        );

        Ok(Self {
            inner: Mutex::new(Journaled {
                table,
                entities,
                meta,
            }),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        })
    }

    /// Creates an empty, non-durable journal-backed store.
    pub fn in_memory() -> SyncResult<Self> {
        Self::open(MemoryBackend::new(), MemoryBackend::new())
    }

    /// Sets how many dead journal records trigger automatic compaction.
    #[must_use]
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Rewrites both journals as snapshots.
    pub fn compact(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        Self::compact_locked(&mut inner)?;
        info!(
            entities = inner.entities.record_count(),
            "entity store compacted"
        );
        Ok(())
    }

    /// Number of records across both journals.
    pub fn journal_records(&self) -> usize {
        let inner = self.inner.lock();
        inner.entities.record_count() + inner.meta.record_count()
    }

    fn compact_locked(inner: &mut Journaled) -> SyncResult<()> {
        let snapshot: Vec<EntityRecord> = inner
            .table
            .records
            .values()
            .cloned()
            .map(EntityRecord::Put)
            .collect();
        inner.entities.rewrite(snapshot.iter())?;
        let meta = [inner.table.meta];
        inner.meta.rewrite(meta.iter())?;
        Ok(())
    }

    fn write<T>(
        &self,
        op: impl FnOnce(&EntityTable) -> (T, Vec<Change>),
    ) -> SyncResult<T> {
        let mut inner = self.inner.lock();
        let (result, changes) = op(&inner.table);
        inner.commit(changes)?;

        let live = inner.table.records.len();
        let dead = inner.entities.record_count().saturating_sub(live)
            + inner.meta.record_count().saturating_sub(1);
        if dead > self.compaction_threshold {
            debug!(dead, "compacting entity store");
            Self::compact_locked(&mut inner)?;
        }
        Ok(result)
    }
}

impl LocalEntityStore for JournalEntityStore {
    fn get(&self, key: &EntityKey) -> SyncResult<Option<LocalEntityRecord>> {
        Ok(self.inner.lock().table.records.get(key).cloned())
    }

    fn upsert(
        &self,
        key: &EntityKey,
        data: EntityData,
        source: UpsertSource,
    ) -> SyncResult<UpsertOutcome> {
        self.write(|table| table.upsert(key, data, source, now_millis()))
    }

    fn delete(&self, key: &EntityKey) -> SyncResult<bool> {
        self.write(|table| {
            let change = table.delete(key);
            (change.is_some(), change.into_iter().collect())
        })
    }

    fn list_dirty(&self) -> SyncResult<Vec<LocalEntityRecord>> {
        Ok(self.inner.lock().table.dirty())
    }

    fn list(&self) -> SyncResult<Vec<LocalEntityRecord>> {
        Ok(self.inner.lock().table.records.values().cloned().collect())
    }

    fn mark_synced(&self, key: &EntityKey, server_version: u64) -> SyncResult<()> {
        self.write(|table| ((), table.mark_synced(key, server_version, now_millis())))
    }

    fn overwrite_from_server(
        &self,
        key: &EntityKey,
        data: EntityData,
        version: u64,
    ) -> SyncResult<()> {
        self.write(|table| ((), vec![table.overwrite(key, data, version, now_millis())]))
    }

    fn set_server_version(&self, key: &EntityKey, version: u64) -> SyncResult<()> {
        self.write(|table| ((), table.set_server_version(key, version).into_iter().collect()))
    }

    fn cursor(&self) -> SyncResult<Timestamp> {
        Ok(self.inner.lock().table.meta.cursor)
    }

    fn advance_cursor(&self, to: Timestamp) -> SyncResult<bool> {
        self.write(|table| {
            let (advanced, change) = table.advance_cursor(to, now_millis());
            (advanced, vec![change])
        })
    }

    fn last_synced_at(&self) -> SyncResult<Option<Timestamp>> {
        Ok(self.inner.lock().table.meta.last_synced_at)
    }
}

impl std::fmt::Debug for JournalEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JournalEntityStore")
            .field("records", &inner.table.records.len())
            .field("cursor", &inner.table.meta.cursor)
            .finish()
    }
}
