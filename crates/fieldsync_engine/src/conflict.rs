//! Conflict resolver and the persisted conflict log.

use crate::error::{RemoteError, SyncError, SyncResult};
use crate::policy::TransportPolicy;
use crate::queue::{Mutation, MutationQueue};
use crate::remote::RemoteSyncApi;
use crate::store::LocalEntityStore;
use fieldsync_journal::{Journal, JournalBackend, MemoryBackend};
use fieldsync_protocol::{
    now_millis, ConflictPolicy, ConflictRecord, ConflictResolution, EntityData, EntityKey,
    FetchRequest, QueueItem,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Priority added to a mutation re-queued after choosing the local side.
pub const KEEP_LOCAL_PRIORITY_BOOST: i32 = 10;

/// Decides manual conflicts.
///
/// Returning `None` defers the decision; the record stays unresolved until
/// [`crate::SyncEngine::resolve_conflict`] is called.
pub trait ConflictChooser: Send + Sync {
    /// Picks a side for `record`.
    fn choose(&self, record: &ConflictRecord) -> Option<ConflictResolution>;
}

impl<F> ConflictChooser for F
where
    F: Fn(&ConflictRecord) -> Option<ConflictResolution> + Send + Sync,
{
    fn choose(&self, record: &ConflictRecord) -> Option<ConflictResolution> {
        self(record)
    }
}

/// Chooser that defers every decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferToUser;

impl ConflictChooser for DeferToUser {
    fn choose(&self, _record: &ConflictRecord) -> Option<ConflictResolution> {
        None
    }
}

/// What the resolver did about a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Server data was written to the local store.
    AppliedServer {
        /// Version now cached locally.
        version: u64,
    },
    /// The local data was queued again against the newer version.
    KeptLocal {
        /// Id of the new queue item.
        queue_id: u64,
    },
    /// Waiting for a manual decision.
    Deferred {
        /// Id of the persisted conflict record.
        conflict_id: String,
    },
    /// The entity no longer exists on the server and was removed locally.
    DeletedLocally,
    /// Server state could not be obtained; the record stays dirty.
    Unresolved,
}

#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Detected(ConflictRecord),
    Resolved {
        id: String,
        resolution: ConflictResolution,
    },
}

struct LogInner {
    journal: Journal<Box<dyn JournalBackend>>,
    records: BTreeMap<String, ConflictRecord>,
}

/// Durable list of conflicts awaiting (or having received) a manual decision.
pub struct ConflictLog {
    inner: Mutex<LogInner>,
}

impl ConflictLog {
    /// Opens a log over `backend`, replaying its journal.
    pub fn open(backend: impl JournalBackend + 'static) -> SyncResult<Self> {
        let backend: Box<dyn JournalBackend> = Box::new(backend);
        let (journal, replayed) = Journal::open::<LogRecord>(backend)?;
        let mut records = BTreeMap::new();
        for record in replayed {
            match record {
                LogRecord::Detected(conflict) => {
                    records.insert(conflict.id.clone(), conflict);
                }
                LogRecord::Resolved { id, resolution } => {
                    if let Some(conflict) = records.get_mut(&id) {
                        conflict.resolve(resolution);
                    }
                }
            }
        }
        Ok(Self {
            inner: Mutex::new(LogInner { journal, records }),
        })
    }

    /// Creates an empty, non-durable log.
    pub fn in_memory() -> SyncResult<Self> {
        Self::open(MemoryBackend::new())
    }

    /// Persists a newly detected conflict.
    pub fn record(&self, conflict: ConflictRecord) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        inner
            .journal
            .append_record(&LogRecord::Detected(conflict.clone()))?;
        inner.records.insert(conflict.id.clone(), conflict);
        Ok(())
    }

    /// Marks a conflict resolved.
    pub fn mark_resolved(&self, id: &str, resolution: ConflictResolution) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if !inner.records.contains_key(id) {
            return Err(SyncError::UnknownConflict(id.to_string()));
        }
        inner.journal.append_record(&LogRecord::Resolved {
            id: id.to_string(),
            resolution,
        })?;
        if let Some(conflict) = inner.records.get_mut(id) {
            conflict.resolve(resolution);
        }
        Ok(())
    }

    /// Looks up a conflict.
    pub fn get(&self, id: &str) -> Option<ConflictRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    /// Conflicts still waiting for a decision, oldest first.
    pub fn unresolved(&self) -> Vec<ConflictRecord> {
        let mut pending: Vec<ConflictRecord> = self
            .inner
            .lock()
            .records
            .values()
            .filter(|c| !c.resolved)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.detected_at);
        pending
    }

    /// Every recorded conflict, oldest first.
    pub fn all(&self) -> Vec<ConflictRecord> {
        let mut all: Vec<ConflictRecord> = self.inner.lock().records.values().cloned().collect();
        all.sort_by_key(|c| c.detected_at);
        all
    }

    /// Drops resolved conflicts and rewrites the journal. Returns how many were dropped.
    pub fn compact(&self) -> SyncResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|_, c| !c.resolved);
        let snapshot: Vec<LogRecord> = inner
            .records
            .values()
            .cloned()
            .map(LogRecord::Detected)
            .collect();
        inner.journal.rewrite(snapshot.iter())?;
        Ok(before - inner.records.len())
    }
}

/// The collaborators the resolver acts on.
pub struct ResolveContext<'a, R: RemoteSyncApi + ?Sized, S: LocalEntityStore + ?Sized> {
    /// Remote used to fetch authoritative state.
    pub remote: &'a R,
    /// Policy wrapping the fetch.
    pub policy: &'a TransportPolicy,
    /// Store receiving the outcome.
    pub store: &'a S,
    /// Queue receiving keep-local re-enqueues.
    pub queue: &'a MutationQueue,
    /// Log holding manual conflicts.
    pub log: &'a ConflictLog,
}

/// Authoritative state gathered for a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerState {
    /// The entity exists on the server.
    Current {
        /// Server data.
        data: EntityData,
        /// Server version.
        version: u64,
    },
    /// The entity no longer exists on the server.
    Gone,
    /// Neither a fetch nor the conflict payload supplied server state.
    Unavailable,
}

/// A decision reached with network calls and the chooser, before any local write.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictDecision {
    /// Replace the local record with server state.
    ApplyServer {
        /// Entity in conflict.
        key: EntityKey,
        /// What the server holds.
        state: ServerState,
        /// Logged conflict to mark resolved, if any.
        conflict_id: Option<String>,
    },
    /// Queue the local data again against the newer version.
    KeepLocal(ConflictRecord),
    /// Leave the logged conflict for a later decision.
    Defer {
        /// Id of the logged conflict.
        conflict_id: String,
    },
}

impl ConflictDecision {
    fn conflict_id(&self) -> Option<&str> {
        match self {
            ConflictDecision::ApplyServer { conflict_id, .. } => conflict_id.as_deref(),
            ConflictDecision::KeepLocal(record) => Some(&record.id),
            ConflictDecision::Defer { conflict_id } => Some(conflict_id),
        }
    }
}

/// Maps a push conflict (or a user choice) to store and queue actions.
///
/// Resolution runs in two steps. [`ConflictResolver::decide`] talks to the
/// remote and the chooser and touches nothing local except the conflict log;
/// [`ConflictResolver::apply`] writes the store and queue. Callers that
/// serialize local writes hold their lock only around `apply`.
///
/// The resolver never retries the rejected request; it either replaces the
/// local record with server state or queues the local data again.
pub struct ConflictResolver {
    policy: ConflictPolicy,
    chooser: Arc<dyn ConflictChooser>,
}

impl ConflictResolver {
    /// Creates a resolver. Manual decisions are deferred until a chooser is set.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            chooser: Arc::new(DeferToUser),
        }
    }

    /// Sets the chooser consulted under [`ConflictPolicy::Manual`].
    #[must_use]
    pub fn with_chooser(mut self, chooser: Arc<dyn ConflictChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    /// Returns the active policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Handles a conflict reported for `item` in one step: decides, removes
    /// `item` from the queue, then applies.
    ///
    /// `item` leaves the queue even when deciding fails.
    pub fn resolve<R, S>(
        &self,
        ctx: &ResolveContext<'_, R, S>,
        item: &QueueItem,
        server_version: u64,
        server_data: Option<EntityData>,
    ) -> SyncResult<ResolutionOutcome>
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        let decision = self.decide(ctx, item, server_version, server_data);
        ctx.queue.remove(item.id)?;
        Self::apply(ctx, decision?)
    }

    /// Decides what to do about a conflict reported for `item`.
    ///
    /// Under [`ConflictPolicy::Manual`] the conflict is logged and the
    /// chooser consulted; choosing the server side fetches its state.
    pub fn decide<R, S>(
        &self,
        ctx: &ResolveContext<'_, R, S>,
        item: &QueueItem,
        server_version: u64,
        server_data: Option<EntityData>,
    ) -> SyncResult<ConflictDecision>
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        warn!(
            entity = %item.key,
            id = item.id,
            server_version,
            policy = ?self.policy,
            "push conflict"
        );

        match self.policy {
            ConflictPolicy::ServerWins => Ok(ConflictDecision::ApplyServer {
                key: item.key.clone(),
                state: Self::fetch_server_state(ctx, &item.key, server_version, server_data),
                conflict_id: None,
            }),
            ConflictPolicy::Manual => {
                let record = ConflictRecord::new(
                    item.key.clone(),
                    item.action,
                    item.priority,
                    item.payload.clone(),
                    server_data,
                    server_version,
                    now_millis(),
                );
                ctx.log.record(record.clone())?;

                match self.chooser.choose(&record) {
                    Some(choice @ (ConflictResolution::Local | ConflictResolution::Server)) => {
                        Self::decide_choice(ctx, &record, choice)
                    }
                    Some(ConflictResolution::Merged) => {
                        warn!(conflict = %record.id, "merged resolution is not supported, deferring");
                        Ok(ConflictDecision::Defer {
                            conflict_id: record.id,
                        })
                    }
                    None => {
                        info!(conflict = %record.id, entity = %record.key, "conflict deferred");
                        Ok(ConflictDecision::Defer {
                            conflict_id: record.id,
                        })
                    }
                }
            }
        }
    }

    /// Turns a side chosen for a logged conflict into a decision.
    pub fn decide_choice<R, S>(
        ctx: &ResolveContext<'_, R, S>,
        record: &ConflictRecord,
        choice: ConflictResolution,
    ) -> SyncResult<ConflictDecision>
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        match choice {
            ConflictResolution::Server => Ok(ConflictDecision::ApplyServer {
                key: record.key.clone(),
                state: Self::fetch_server_state(
                    ctx,
                    &record.key,
                    record.server_version,
                    record.server_data.clone(),
                ),
                conflict_id: Some(record.id.clone()),
            }),
            ConflictResolution::Local => Ok(ConflictDecision::KeepLocal(record.clone())),
            ConflictResolution::Merged => Err(SyncError::InvalidResolution(
                "merged resolution is reserved".into(),
            )),
        }
    }

    /// Fetches the entity, falling back to the state reported with the conflict.
    pub fn fetch_server_state<R, S>(
        ctx: &ResolveContext<'_, R, S>,
        key: &EntityKey,
        server_version: u64,
        server_data: Option<EntityData>,
    ) -> ServerState
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        let request = FetchRequest { key: key.clone() };
        match ctx.policy.call("fetch", || ctx.remote.fetch(&request)) {
            Ok(entity) => ServerState::Current {
                data: entity.data,
                version: entity.version,
            },
            Err(RemoteError::NotFound) => ServerState::Gone,
            Err(err) => match server_data {
                Some(data) => {
                    debug!(entity = %key, error = %err, "fetch failed, using conflict payload");
                    ServerState::Current {
                        data,
                        version: server_version,
                    }
                }
                None => {
                    warn!(entity = %key, error = %err, "server state unavailable");
                    ServerState::Unavailable
                }
            },
        }
    }

    /// Writes a decision to the store and queue and marks its conflict resolved.
    ///
    /// A mutation queued for the entity while the decision was being made
    /// is newer than the conflicting one and takes its place.
    pub fn apply<R, S>(
        ctx: &ResolveContext<'_, R, S>,
        decision: ConflictDecision,
    ) -> SyncResult<ResolutionOutcome>
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        if let Some(id) = decision.conflict_id() {
            if ctx.log.get(id).is_some_and(|record| record.resolved) {
                return Err(SyncError::InvalidResolution(format!(
                    "conflict {id} is already resolved"
                )));
            }
        }

        match decision {
            ConflictDecision::ApplyServer {
                key,
                state,
                conflict_id,
            } => {
                let outcome = Self::apply_server(ctx, &key, state)?;
                if let Some(id) = conflict_id {
                    ctx.log.mark_resolved(&id, ConflictResolution::Server)?;
                }
                Ok(outcome)
            }
            ConflictDecision::KeepLocal(record) => {
                let outcome = Self::keep_local(ctx, record.clone())?;
                ctx.log.mark_resolved(&record.id, ConflictResolution::Local)?;
                Ok(outcome)
            }
            ConflictDecision::Defer { conflict_id } => {
                Ok(ResolutionOutcome::Deferred { conflict_id })
            }
        }
    }

    fn keep_local<R, S>(
        ctx: &ResolveContext<'_, R, S>,
        mut record: ConflictRecord,
    ) -> SyncResult<ResolutionOutcome>
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        if let Some(pending) = ctx.queue.item_for(&record.key) {
            record.action = pending.action;
            record.local_data = pending.payload;
            record.priority = record.priority.max(pending.priority);
        }
        let mutation = Mutation::new(record.key.clone(), record.action, record.local_data.clone())
            .with_priority(record.priority.saturating_add(KEEP_LOCAL_PRIORITY_BOOST))
            .with_expected_version(Some(record.server_version));
        let queue_id = ctx.queue.enqueue(mutation)?;
        ctx.store.set_server_version(&record.key, record.server_version)?;
        info!(entity = %record.key, queue_id, "kept local data");
        Ok(ResolutionOutcome::KeptLocal { queue_id })
    }

    fn apply_server<R, S>(
        ctx: &ResolveContext<'_, R, S>,
        key: &EntityKey,
        state: ServerState,
    ) -> SyncResult<ResolutionOutcome>
    where
        R: RemoteSyncApi + ?Sized,
        S: LocalEntityStore + ?Sized,
    {
        match state {
            ServerState::Current { data, version } => {
                if ctx.queue.item_for(key).is_some() {
                    // A newer local edit is queued; it will push against this version.
                    ctx.store.set_server_version(key, version)?;
                    debug!(entity = %key, version, "newer local edit kept over server data");
                } else {
                    ctx.store.overwrite_from_server(key, data, version)?;
                    debug!(entity = %key, version, "applied server data");
                }
                Ok(ResolutionOutcome::AppliedServer { version })
            }
            ServerState::Gone => {
                if let Some(pending) = ctx.queue.item_for(key) {
                    ctx.queue.remove(pending.id)?;
                }
                ctx.store.delete(key)?;
                info!(entity = %key, "entity gone on server, removed locally");
                Ok(ResolutionOutcome::DeletedLocally)
            }
            ServerState::Unavailable => {
                warn!(entity = %key, "conflict unresolved, record stays dirty");
                Ok(ResolutionOutcome::Unresolved)
            }
        }
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::policy::RecordingSleeper;
    use crate::remote::MockRemote;
    use crate::store::{MemoryEntityStore, UpsertSource};
    use fieldsync_protocol::{Action, Job, JobStatus, RemoteEntity};

    struct Fixture {
        remote: MockRemote,
        policy: TransportPolicy,
        store: MemoryEntityStore,
        queue: MutationQueue,
        log: ConflictLog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                remote: MockRemote::new(),
                policy: TransportPolicy::new(RetryConfig::new(3))
                    .with_sleeper(Arc::new(RecordingSleeper::new())),
                store: MemoryEntityStore::new(),
                queue: MutationQueue::in_memory().unwrap(),
                log: ConflictLog::in_memory().unwrap(),
            }
        }

        fn ctx(&self) -> ResolveContext<'_, MockRemote, MemoryEntityStore> {
            ResolveContext {
                remote: &self.remote,
                policy: &self.policy,
                store: &self.store,
                queue: &self.queue,
                log: &self.log,
            }
        }

        /// A dirty job-1 at server version 2 with its queued update.
        fn dirty_job(&self) -> QueueItem {
            let key = EntityKey::job("job-1");
            self.store
                .upsert(&key, job(JobStatus::Scheduled), UpsertSource::Server(2))
                .unwrap();
            self.store
                .upsert(&key, job(JobStatus::Completed), UpsertSource::Local)
                .unwrap();
            let id = self
                .queue
                .enqueue(Mutation::update(key, job(JobStatus::Completed)).with_priority(1))
                .unwrap();
            self.queue.get(id).unwrap()
        }
    }

    fn job(status: JobStatus) -> EntityData {
        Job::with_status(status).into()
    }

    #[test]
    fn server_wins_fetches_and_overwrites() {
        let fx = Fixture::new();
        let item = fx.dirty_job();
        fx.remote.script_fetch(Ok(RemoteEntity {
            key: item.key.clone(),
            data: job(JobStatus::Cancelled),
            version: 4,
        }));

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let outcome = resolver.resolve(&fx.ctx(), &item, 4, None).unwrap();

        assert_eq!(outcome, ResolutionOutcome::AppliedServer { version: 4 });
        let record = fx.store.get(&item.key).unwrap().unwrap();
        assert_eq!(record.server_version, Some(4));
        assert!(!record.is_dirty);
        assert_eq!(record.data, job(JobStatus::Cancelled));
        assert!(fx.log.all().is_empty());
    }

    #[test]
    fn server_wins_deletes_when_entity_is_gone() {
        let fx = Fixture::new();
        let item = fx.dirty_job();

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let outcome = resolver.resolve(&fx.ctx(), &item, 4, None).unwrap();

        assert_eq!(outcome, ResolutionOutcome::DeletedLocally);
        assert!(fx.store.get(&item.key).unwrap().is_none());
    }

    #[test]
    fn server_wins_falls_back_to_conflict_payload() {
        let fx = Fixture::new();
        let item = fx.dirty_job();
        fx.remote
            .script_fetch(Err(RemoteError::Server("unavailable".into())));

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let outcome = resolver
            .resolve(&fx.ctx(), &item, 5, Some(job(JobStatus::InProgress)))
            .unwrap();

        assert_eq!(outcome, ResolutionOutcome::AppliedServer { version: 5 });
        assert_eq!(
            fx.store.get(&item.key).unwrap().unwrap().data,
            job(JobStatus::InProgress)
        );
    }

    #[test]
    fn server_wins_without_any_server_state_is_unresolved() {
        let fx = Fixture::new();
        let item = fx.dirty_job();
        fx.remote.set_online(false);

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let outcome = resolver.resolve(&fx.ctx(), &item, 5, None).unwrap();

        assert_eq!(outcome, ResolutionOutcome::Unresolved);
        assert!(fx.store.get(&item.key).unwrap().unwrap().is_dirty);
    }

    #[test]
    fn manual_keep_local_requeues_with_boost() {
        let fx = Fixture::new();
        let item = fx.dirty_job();

        let chooser: Arc<dyn ConflictChooser> =
            Arc::new(|_: &ConflictRecord| Some(ConflictResolution::Local));
        let resolver = ConflictResolver::new(ConflictPolicy::Manual).with_chooser(chooser);
        let outcome = resolver
            .resolve(&fx.ctx(), &item, 4, Some(job(JobStatus::Cancelled)))
            .unwrap();

        let queue_id = match outcome {
            ResolutionOutcome::KeptLocal { queue_id } => queue_id,
            other => panic!("expected KeptLocal, got {other:?}"),
        };
        let requeued = fx.queue.get(queue_id).unwrap();
        assert_eq!(requeued.priority, 1 + KEEP_LOCAL_PRIORITY_BOOST);
        assert_eq!(requeued.expected_version, Some(4));
        assert_eq!(requeued.action, Action::Update);
        assert_eq!(requeued.payload, Some(job(JobStatus::Completed)));
        assert!(fx.queue.get(item.id).is_none());

        let record = fx.store.get(&item.key).unwrap().unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.server_version, Some(4));

        let logged = fx.log.all();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].resolution, Some(ConflictResolution::Local));
    }

    #[test]
    fn manual_keep_server_matches_server_wins() {
        let fx = Fixture::new();
        let item = fx.dirty_job();
        fx.remote.script_fetch(Ok(RemoteEntity {
            key: item.key.clone(),
            data: job(JobStatus::Cancelled),
            version: 4,
        }));

        let chooser: Arc<dyn ConflictChooser> =
            Arc::new(|_: &ConflictRecord| Some(ConflictResolution::Server));
        let resolver = ConflictResolver::new(ConflictPolicy::Manual).with_chooser(chooser);
        let outcome = resolver.resolve(&fx.ctx(), &item, 4, None).unwrap();

        assert_eq!(outcome, ResolutionOutcome::AppliedServer { version: 4 });
        assert!(fx.log.unresolved().is_empty());
    }

    #[test]
    fn manual_without_choice_defers() {
        let fx = Fixture::new();
        let item = fx.dirty_job();

        let resolver = ConflictResolver::new(ConflictPolicy::Manual);
        let outcome = resolver
            .resolve(&fx.ctx(), &item, 4, Some(job(JobStatus::Cancelled)))
            .unwrap();

        let conflict_id = match outcome {
            ResolutionOutcome::Deferred { conflict_id } => conflict_id,
            other => panic!("expected Deferred, got {other:?}"),
        };
        let pending = fx.log.unresolved();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, conflict_id);
        assert_eq!(pending[0].local_data, Some(job(JobStatus::Completed)));
        assert_eq!(pending[0].server_version, 4);
        assert!(fx.remote.fetch_requests().is_empty());
    }

    #[test]
    fn newer_local_edit_survives_server_wins() {
        let fx = Fixture::new();
        let item = fx.dirty_job();
        fx.remote.script_fetch(Ok(RemoteEntity {
            key: item.key.clone(),
            data: job(JobStatus::Cancelled),
            version: 4,
        }));

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let decision = resolver.decide(&fx.ctx(), &item, 4, None).unwrap();
        assert_eq!(
            decision,
            ConflictDecision::ApplyServer {
                key: item.key.clone(),
                state: ServerState::Current {
                    data: job(JobStatus::Cancelled),
                    version: 4,
                },
                conflict_id: None,
            }
        );

        // Edited again while the fetch was in flight.
        fx.store
            .upsert(&item.key, job(JobStatus::InProgress), UpsertSource::Local)
            .unwrap();
        let newer = fx
            .queue
            .enqueue(Mutation::update(item.key.clone(), job(JobStatus::InProgress)))
            .unwrap();
        assert!(!fx.queue.remove(item.id).unwrap());

        let outcome = ConflictResolver::apply(&fx.ctx(), decision).unwrap();
        assert_eq!(outcome, ResolutionOutcome::AppliedServer { version: 4 });
        let record = fx.store.get(&item.key).unwrap().unwrap();
        assert!(record.is_dirty);
        assert_eq!(record.data, job(JobStatus::InProgress));
        assert_eq!(record.server_version, Some(4));
        assert!(fx.queue.get(newer).is_some());
    }

    #[test]
    fn deciding_does_not_touch_store_or_queue() {
        let fx = Fixture::new();
        let item = fx.dirty_job();

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let decision = resolver.decide(&fx.ctx(), &item, 4, None).unwrap();

        assert!(matches!(
            decision,
            ConflictDecision::ApplyServer {
                state: ServerState::Gone,
                ..
            }
        ));
        assert!(fx.store.get(&item.key).unwrap().unwrap().is_dirty);
        assert!(fx.queue.get(item.id).is_some());
    }

    #[test]
    fn merged_choice_is_rejected() {
        let fx = Fixture::new();
        let record = ConflictRecord::new(
            EntityKey::job("job-1"),
            Action::Update,
            0,
            None,
            None,
            3,
            0,
        );
        let result =
            ConflictResolver::decide_choice(&fx.ctx(), &record, ConflictResolution::Merged);
        assert!(matches!(result, Err(SyncError::InvalidResolution(_))));
    }

    #[test]
    fn log_replays_and_compacts() {
        let backend = MemoryBackend::new();
        let (open_id, closed_id) = {
            let log = ConflictLog::open(backend.clone()).unwrap();
            let open = ConflictRecord::new(EntityKey::job("a"), Action::Update, 0, None, None, 2, 1);
            let closed =
                ConflictRecord::new(EntityKey::job("b"), Action::Delete, 0, None, None, 3, 2);
            log.record(open.clone()).unwrap();
            log.record(closed.clone()).unwrap();
            log.mark_resolved(&closed.id, ConflictResolution::Server)
                .unwrap();
            (open.id, closed.id)
        };

        let log = ConflictLog::open(backend).unwrap();
        assert_eq!(log.all().len(), 2);
        assert_eq!(log.unresolved().len(), 1);
        assert!(log.get(&closed_id).unwrap().resolved);

        assert_eq!(log.compact().unwrap(), 1);
        assert!(log.get(&closed_id).is_none());
        assert!(log.get(&open_id).is_some());
        assert!(matches!(
            log.mark_resolved("missing", ConflictResolution::Local),
            Err(SyncError::UnknownConflict(_))
        ));
    }
}
