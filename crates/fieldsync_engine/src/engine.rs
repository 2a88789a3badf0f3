//! The reconciliation engine.

use crate::config::SyncConfig;
use crate::conflict::{ConflictChooser, ConflictLog, ConflictResolver, ResolutionOutcome, ResolveContext};
use crate::error::{SyncError, SyncResult};
use crate::policy::{PushOutcome, Sleeper, TransportPolicy};
use crate::queue::{Mutation, MutationQueue};
use crate::remote::RemoteSyncApi;
use crate::state::{CycleReport, SyncState, SyncStats, SyncStatus, Trigger};
use crate::store::{JournalEntityStore, LocalEntityStore, UpsertOutcome, UpsertSource};
use fieldsync_journal::DataDir;
use fieldsync_protocol::{
    Action, ConflictRecord, ConflictResolution, EntityData, EntityKey, PullRequest, PushRequest,
    QueueItem, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Callback notified with a fresh [`SyncStatus`].
pub type StatusListener = Box<dyn Fn(&SyncStatus) + Send + Sync>;

/// Orchestrates pull-then-push reconciliation cycles.
///
/// # Invariants
///
/// - At most one cycle runs at a time; a trigger arriving meanwhile is dropped
/// - Pull completes before push starts; a failed pull skips the push phase
/// - Push handles one item at a time, in queue order, each at most once per cycle
/// - A conflicting item leaves the queue exactly once, whatever the resolution
pub struct SyncEngine<R: RemoteSyncApi, S: LocalEntityStore> {
    config: SyncConfig,
    remote: R,
    store: S,
    queue: MutationQueue,
    conflicts: ConflictLog,
    resolver: ConflictResolver,
    policy: TransportPolicy,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    listeners: RwLock<Vec<(u64, StatusListener)>>,
    next_listener: AtomicU64,
    cycle_guard: Mutex<()>,
    write_lock: Mutex<()>,
}

impl<R: RemoteSyncApi> SyncEngine<R, JournalEntityStore> {
    /// Opens an engine over the journals in a locked data directory.
    pub fn open(config: SyncConfig, remote: R, dir: &DataDir) -> SyncResult<Self> {
        let threshold = config.compaction_threshold;
        let store = JournalEntityStore::open(dir.entities_backend()?, dir.meta_backend()?)?
            .with_compaction_threshold(threshold);
        let queue = MutationQueue::open(dir.queue_backend()?)?.with_compaction_threshold(threshold);
        let conflicts = ConflictLog::open(dir.conflicts_backend()?)?;
        Ok(Self::new(config, remote, store, queue, conflicts))
    }
}

impl<R: RemoteSyncApi, S: LocalEntityStore> SyncEngine<R, S> {
    /// Creates an engine from its parts.
    pub fn new(
        config: SyncConfig,
        remote: R,
        store: S,
        queue: MutationQueue,
        conflicts: ConflictLog,
    ) -> Self {
        let policy = TransportPolicy::new(config.retry.clone());
        let resolver = ConflictResolver::new(config.conflict_policy);
        Self {
            config,
            remote,
            store,
            queue,
            conflicts,
            resolver,
            policy,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            cycle_guard: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates an engine with a non-durable queue and conflict log.
    pub fn in_memory(config: SyncConfig, remote: R, store: S) -> SyncResult<Self> {
        Ok(Self::new(
            config,
            remote,
            store,
            MutationQueue::in_memory()?,
            ConflictLog::in_memory()?,
        ))
    }

    /// Sets the chooser consulted for manual conflicts.
    #[must_use]
    pub fn with_chooser(mut self, chooser: Arc<dyn ConflictChooser>) -> Self {
        self.resolver = self.resolver.with_chooser(chooser);
        self
    }

    /// Replaces the sleeper used between rate-limit retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.policy = self.policy.with_sleeper(sleeper);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the remote.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the local entity store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Returns the conflict log.
    pub fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Builds a status snapshot.
    pub fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            state: self.state(),
            pending_count: self.queue.count(),
            failed_count: self.queue.failed_items().len(),
            unresolved_conflicts: self.conflicts.unresolved().len(),
            last_synced_at: self.store.last_synced_at()?,
            cursor: self.store.cursor()?,
            last_error: self.stats.read().last_error.clone(),
        })
    }

    /// Registers a status listener. Returns an id for [`SyncEngine::unsubscribe`].
    ///
    /// Listeners run on the thread that changed the state and must not
    /// subscribe or unsubscribe from inside the callback.
    pub fn subscribe(&self, listener: impl Fn(&SyncStatus) + Send + Sync + 'static) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Records a local mutation: writes the store and queues the change.
    ///
    /// Returns the queue item id.
    pub fn record_change(
        &self,
        key: EntityKey,
        action: Action,
        data: Option<EntityData>,
        priority: i32,
    ) -> SyncResult<u64> {
        self.record_mutation(Mutation::new(key, action, data).with_priority(priority))
    }

    /// Like [`SyncEngine::record_change`], for a fully specified mutation.
    pub fn record_mutation(&self, mut mutation: Mutation) -> SyncResult<u64> {
        QueueItem::validate_mutation(&mutation.key, mutation.action, mutation.payload.as_ref())
            .map_err(|e| SyncError::InvalidMutation(e.to_string()))?;

        let id = {
            let _write = self.write_lock.lock();
            let pending = self.queue.item_for(&mutation.key).map(|item| item.action);

            match mutation.action {
                Action::Delete => {
                    if mutation.expected_version.is_none() {
                        mutation.expected_version = self
                            .store
                            .get(&mutation.key)?
                            .and_then(|record| record.server_version);
                    }
                    self.store.delete(&mutation.key)?;
                }
                Action::Create | Action::Update => {
                    // The server has never seen a pending create.
                    if pending == Some(Action::Create) {
                        mutation.action = Action::Create;
                    }
                    if let Some(data) = mutation.payload.clone() {
                        self.store.upsert(&mutation.key, data, UpsertSource::Local)?;
                    }
                }
            }
            self.queue.enqueue(mutation)?
        };

        self.notify();
        Ok(id)
    }

    /// Runs one reconciliation cycle.
    ///
    /// Returns a skipped report if another cycle is running. A pull failure
    /// other than rate limiting aborts the cycle and is returned as
    /// [`SyncError::PullFailed`]; the queue is left untouched.
    pub fn sync(&self, trigger: Trigger) -> SyncResult<CycleReport> {
        let Some(_cycle) = self.cycle_guard.try_lock() else {
            debug!(trigger = %trigger, "cycle already running, trigger dropped");
            self.stats.write().cycles_skipped += 1;
            return Ok(CycleReport::skipped(trigger));
        };

        let start = Instant::now();
        let mut report = CycleReport::new(trigger);
        info!(trigger = %trigger, pending = self.queue.count(), "sync cycle started");

        self.set_state(SyncState::Pulling);
        if let Err(err) = self.pull_phase(&mut report) {
            return Err(self.fail_cycle(err, &report, start));
        }

        if report.pull_rate_limited {
            warn!("pull rate limited, push deferred to next trigger");
        } else {
            self.set_state(SyncState::Pushing);
            if let Err(err) = self.push_phase(&mut report) {
                return Err(self.fail_cycle(err, &report, start));
            }
        }

        report.duration = start.elapsed();
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.entities_pulled += report.pulled_updates as u64;
            stats.mutations_pushed += report.pushed as u64;
            stats.conflicts_encountered += report.conflicts as u64;
            stats.last_error = None;
        }
        self.set_state(SyncState::Idle);

        info!(
            trigger = %trigger,
            pulled = report.pulled_updates,
            deleted = report.pulled_deletes,
            pushed = report.pushed,
            conflicts = report.conflicts,
            failed = report.failed,
            rate_limited = report.rate_limited,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Total queued items, including failed ones.
    pub fn pending_count(&self) -> usize {
        self.queue.count()
    }

    /// Items at the retry cap.
    pub fn failed_items(&self) -> Vec<QueueItem> {
        self.queue.failed_items()
    }

    /// Time of the last successful reconciliation.
    pub fn last_synced_at(&self) -> SyncResult<Option<Timestamp>> {
        self.store.last_synced_at()
    }

    /// Conflicts awaiting a manual decision.
    pub fn unresolved_conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.unresolved()
    }

    /// Makes a failed item eligible again.
    pub fn retry_failed(&self, id: u64) -> SyncResult<()> {
        self.queue.reset_for_retry(id)?;
        self.notify();
        Ok(())
    }

    /// Makes every failed item eligible again. Returns how many were reset.
    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        let reset = self.queue.reset_all_failed()?;
        self.notify();
        Ok(reset)
    }

    /// Drops a queued item without pushing it. The local record keeps its data.
    pub fn clear_item(&self, id: u64) -> SyncResult<()> {
        if !self.queue.remove(id)? {
            return Err(SyncError::UnknownItem(id));
        }
        self.notify();
        Ok(())
    }

    /// Applies a decision to a deferred conflict.
    pub fn resolve_conflict(
        &self,
        id: &str,
        resolution: ConflictResolution,
    ) -> SyncResult<ResolutionOutcome> {
        let record = self
            .conflicts
            .get(id)
            .ok_or_else(|| SyncError::UnknownConflict(id.to_string()))?;
        if record.resolved {
            return Err(SyncError::InvalidResolution(format!(
                "conflict {id} is already resolved"
            )));
        }
        if resolution == ConflictResolution::Merged {
            return Err(SyncError::InvalidResolution(
                "merged resolution is reserved".into(),
            ));
        }

        let context = self.resolve_context();
        let decision = ConflictResolver::decide_choice(&context, &record, resolution)?;
        let outcome = {
            let _write = self.write_lock.lock();
            ConflictResolver::apply(&context, decision)?
        };

        info!(conflict = id, resolution = %resolution, outcome = ?outcome, "conflict resolved");
        self.notify();
        Ok(outcome)
    }

    /// Compacts the queue and drops resolved conflicts.
    pub fn compact(&self) -> SyncResult<()> {
        self.queue.compact()?;
        self.conflicts.compact()?;
        Ok(())
    }

    fn pull_phase(&self, report: &mut CycleReport) -> SyncResult<()> {
        loop {
            let since = self.store.cursor()?;
            let request = PullRequest::new(since, self.config.entity_kinds.clone());

            let response = match self.policy.call("pull", || self.remote.pull(&request)) {
                Ok(response) => response,
                Err(err) if err.is_rate_limited() => {
                    warn!(since, "pull rate limited, cursor not advanced");
                    report.pull_rate_limited = true;
                    return Ok(());
                }
                Err(err) => {
                    warn!(since, error = %err, "pull failed");
                    return Err(SyncError::PullFailed(err));
                }
            };

            for entity in response.updated {
                let _write = self.write_lock.lock();
                let was_dirty = self
                    .store
                    .get(&entity.key)?
                    .is_some_and(|record| record.is_dirty);
                let outcome = self.store.upsert(
                    &entity.key,
                    entity.data,
                    UpsertSource::Server(entity.version),
                )?;
                match outcome {
                    UpsertOutcome::Applied => {
                        report.pulled_updates += 1;
                        if was_dirty {
                            self.drop_superseded(&entity.key, report)?;
                        }
                    }
                    UpsertOutcome::SkippedDirty => report.skipped_dirty += 1,
                }
            }

            for key in &response.deleted {
                let _write = self.write_lock.lock();
                self.store.delete(key)?;
                self.drop_superseded(key, report)?;
                report.pulled_deletes += 1;
            }

            self.store.advance_cursor(response.synced_at)?;
            debug!(
                since,
                synced_at = response.synced_at,
                has_more = response.has_more,
                "pull page applied"
            );

            if !response.has_more {
                return Ok(());
            }
            if response.synced_at <= since {
                warn!(since, "server reported more changes without advancing, stopping pull");
                return Ok(());
            }
        }
    }

    /// Drops the pending mutation for an entity the server has moved past.
    fn drop_superseded(&self, key: &EntityKey, report: &mut CycleReport) -> SyncResult<()> {
        if let Some(item) = self.queue.item_for(key) {
            if self.queue.remove(item.id)? {
                warn!(
                    id = item.id,
                    entity = %key,
                    action = %item.action,
                    "pending change superseded by server"
                );
                report.superseded += 1;
            }
        }
        Ok(())
    }

    fn push_phase(&self, report: &mut CycleReport) -> SyncResult<()> {
        let batch_size = self.config.push_batch_size;
        let mut attempted: HashSet<u64> = HashSet::new();

        for _ in 0..self.config.max_push_batches_per_cycle {
            let batch: Vec<QueueItem> = self
                .queue
                .next_batch(batch_size + attempted.len())
                .into_iter()
                .filter(|item| !attempted.contains(&item.id))
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }
            report.batches += 1;

            let mut paused = false;
            for item in &batch {
                attempted.insert(item.id);
                if !self.push_item(item, report)? {
                    paused = true;
                    break;
                }
            }

            self.notify();
            if paused {
                break;
            }
        }
        Ok(())
    }

    /// Pushes one item. Returns false if the push phase must pause.
    fn push_item(&self, item: &QueueItem, report: &mut CycleReport) -> SyncResult<bool> {
        let expected_version = match item.expected_version {
            Some(version) => Some(version),
            None => self
                .store
                .get(&item.key)?
                .and_then(|record| record.server_version),
        };
        let request = PushRequest {
            key: item.key.clone(),
            action: item.action,
            payload: item.payload.clone(),
            expected_version,
        };

        match self.policy.push(&self.remote, &request) {
            PushOutcome::Success(ack) => {
                let _write = self.write_lock.lock();
                self.queue.mark_success(item.id)?;
                if item.action != Action::Delete {
                    if self.queue.item_for(&item.key).is_some() {
                        // Edited again mid-push; stay dirty for the newer item.
                        self.store.set_server_version(&item.key, ack.server_version)?;
                    } else {
                        self.store.mark_synced(&item.key, ack.server_version)?;
                    }
                }
                debug!(id = item.id, entity = %item.key, version = ack.server_version, "pushed");
                report.pushed += 1;
            }
            PushOutcome::Conflict {
                server_version,
                server_data,
            } => {
                report.conflicts += 1;
                let context = self.resolve_context();
                let decision = self
                    .resolver
                    .decide(&context, item, server_version, server_data);
                let outcome = {
                    let _write = self.write_lock.lock();
                    self.queue.remove(item.id)?;
                    ConflictResolver::apply(&context, decision?)?
                };
                debug!(id = item.id, entity = %item.key, outcome = ?outcome, "conflict handled");
            }
            PushOutcome::RateLimited { retry_after } => {
                warn!(
                    id = item.id,
                    entity = %item.key,
                    retry_after_ms = retry_after.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    "push rate limited, pausing until next cycle"
                );
                report.rate_limited = true;
                return Ok(false);
            }
            PushOutcome::Failed(message) => {
                warn!(id = item.id, entity = %item.key, error = %message, "push failed");
                match self.queue.mark_failed(item.id, message) {
                    Err(SyncError::UnknownItem(_)) => {
                        debug!(id = item.id, "item cleared during push");
                    }
                    other => other?,
                }
                report.failed += 1;
            }
        }
        Ok(true)
    }

    fn resolve_context(&self) -> ResolveContext<'_, R, S> {
        ResolveContext {
            remote: &self.remote,
            policy: &self.policy,
            store: &self.store,
            queue: &self.queue,
            log: &self.conflicts,
        }
    }

    fn fail_cycle(&self, err: SyncError, report: &CycleReport, start: Instant) -> SyncError {
        warn!(
            trigger = %report.trigger,
            error = %err,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "sync cycle failed"
        );
        {
            let mut stats = self.stats.write();
            stats.cycles_failed += 1;
            stats.last_error = Some(err.to_string());
        }
        self.set_state(SyncState::Error);
        err
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
        self.notify();
    }

    fn notify(&self) {
        let listeners = self.listeners.read();
        if listeners.is_empty() {
            return;
        }
        match self.status() {
            Ok(status) => {
                for (_, listener) in listeners.iter() {
                    listener(&status);
                }
            }
            Err(err) => debug!(error = %err, "status unavailable, listeners not notified"),
        }
    }
}

impl<R: RemoteSyncApi, S: LocalEntityStore> std::fmt::Debug for SyncEngine<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("pending", &self.queue.count())
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::RemoteError;
    use crate::policy::RecordingSleeper;
    use crate::remote::MockRemote;
    use crate::store::MemoryEntityStore;
    use fieldsync_protocol::{Job, JobStatus, PullResponse, PushAck, RemoteEntity};

    fn engine() -> SyncEngine<MockRemote, MemoryEntityStore> {
        SyncEngine::in_memory(
            SyncConfig::new().with_retry(RetryConfig::new(3)),
            MockRemote::new(),
            MemoryEntityStore::new(),
        )
        .unwrap()
        .with_sleeper(Arc::new(RecordingSleeper::new()))
    }

    fn job(status: JobStatus) -> Option<EntityData> {
        Some(Job::with_status(status).into())
    }

    #[test]
    fn initial_state() {
        let engine = engine();
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        let status = engine.status().unwrap();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.cursor, 0);
        assert!(status.last_synced_at.is_none());
    }

    #[test]
    fn record_change_writes_store_and_queue() {
        let engine = engine();
        let key = EntityKey::job("job-1");
        engine
            .record_change(key.clone(), Action::Update, job(JobStatus::InProgress), 0)
            .unwrap();

        assert_eq!(engine.pending_count(), 1);
        assert!(engine.store().get(&key).unwrap().unwrap().is_dirty);
    }

    #[test]
    fn invalid_change_touches_nothing() {
        let engine = engine();
        let key = EntityKey::job("job-1");
        let result = engine.record_change(key.clone(), Action::Create, None, 0);
        assert!(matches!(result, Err(SyncError::InvalidMutation(_))));
        assert!(engine.store().get(&key).unwrap().is_none());
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn update_after_pending_create_stays_a_create() {
        let engine = engine();
        let key = EntityKey::job("job-new");
        engine
            .record_change(key.clone(), Action::Create, job(JobStatus::Scheduled), 0)
            .unwrap();
        engine
            .record_change(key.clone(), Action::Update, job(JobStatus::InProgress), 0)
            .unwrap();

        let item = engine.queue().item_for(&key).unwrap();
        assert_eq!(item.action, Action::Create);
        assert_eq!(item.payload, job(JobStatus::InProgress));
    }

    #[test]
    fn delete_captures_known_server_version() {
        let engine = engine();
        let key = EntityKey::job("job-1");
        engine
            .store()
            .upsert(&key, Job::with_status(JobStatus::Scheduled).into(), UpsertSource::Server(6))
            .unwrap();

        let id = engine.record_change(key.clone(), Action::Delete, None, 0).unwrap();

        assert!(engine.store().get(&key).unwrap().is_none());
        assert_eq!(engine.queue().get(id).unwrap().expected_version, Some(6));
    }

    #[test]
    fn pull_failure_aborts_cycle_before_push() {
        let engine = engine();
        engine
            .record_change(EntityKey::job("job-1"), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        engine
            .remote()
            .script_pull(Err(RemoteError::Server("database down".into())));

        let result = engine.sync(Trigger::Requested);

        assert!(matches!(result, Err(SyncError::PullFailed(_))));
        assert_eq!(engine.state(), SyncState::Error);
        assert!(engine.remote().push_requests().is_empty());
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.queue().next_batch(10)[0].retry_count, 0);
        assert!(engine.status().unwrap().last_error.is_some());

        // Error is a resting state; the next trigger runs a fresh cycle.
        let report = engine.sync(Trigger::Requested).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(engine.state(), SyncState::Idle);
        assert!(engine.status().unwrap().last_error.is_none());
    }

    #[test]
    fn pull_rate_limit_is_swallowed() {
        let engine = engine();
        engine
            .record_change(EntityKey::job("job-1"), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        for _ in 0..3 {
            engine
                .remote()
                .script_pull(Err(RemoteError::RateLimited { retry_after: None }));
        }

        let report = engine.sync(Trigger::Requested).unwrap();

        assert!(report.pull_rate_limited);
        assert_eq!(report.pushed, 0);
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.store().cursor().unwrap(), 0);
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn pull_applies_updates_deletes_and_cursor() {
        let engine = engine();
        let gone = EntityKey::job("job-gone");
        engine
            .store()
            .upsert(&gone, Job::with_status(JobStatus::Scheduled).into(), UpsertSource::Server(1))
            .unwrap();
        engine.remote().script_pull(Ok(PullResponse {
            updated: vec![RemoteEntity {
                key: EntityKey::job("job-2"),
                data: Job::with_status(JobStatus::Scheduled).into(),
                version: 1,
            }],
            deleted: vec![gone.clone()],
            synced_at: 500,
            has_more: false,
        }));

        let report = engine.sync(Trigger::ConnectivityRestored).unwrap();

        assert_eq!(report.pulled_updates, 1);
        assert_eq!(report.pulled_deletes, 1);
        assert!(engine.store().get(&gone).unwrap().is_none());
        assert_eq!(engine.store().cursor().unwrap(), 500);
        assert_eq!(engine.remote().pull_requests()[0].since, 0);
    }

    #[test]
    fn paged_pull_follows_has_more() {
        let engine = engine();
        engine.remote().script_pull(Ok(PullResponse {
            synced_at: 100,
            has_more: true,
            ..PullResponse::default()
        }));
        engine.remote().script_pull(Ok(PullResponse {
            synced_at: 200,
            has_more: false,
            ..PullResponse::default()
        }));

        engine.sync(Trigger::Requested).unwrap();

        let requests = engine.remote().pull_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].since, 100);
        assert_eq!(engine.store().cursor().unwrap(), 200);
    }

    #[test]
    fn newer_pull_supersedes_pending_change() {
        let engine = engine();
        let key = EntityKey::job("job-1");
        engine
            .store()
            .upsert(&key, Job::with_status(JobStatus::Scheduled).into(), UpsertSource::Server(3))
            .unwrap();
        engine
            .record_change(key.clone(), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        engine.remote().script_pull(Ok(PullResponse {
            updated: vec![RemoteEntity {
                key: key.clone(),
                data: Job::with_status(JobStatus::Cancelled).into(),
                version: 4,
            }],
            synced_at: 10,
            ..PullResponse::default()
        }));

        let report = engine.sync(Trigger::Requested).unwrap();

        assert_eq!(report.superseded, 1);
        assert_eq!(report.pushed, 0);
        assert!(engine.remote().push_requests().is_empty());
        let record = engine.store().get(&key).unwrap().unwrap();
        assert!(!record.is_dirty);
        assert_eq!(record.server_version, Some(4));
    }

    #[test]
    fn pulled_delete_removes_dirty_record_and_its_change() {
        let engine = engine();
        let key = EntityKey::job("job-1");
        engine
            .store()
            .upsert(&key, Job::with_status(JobStatus::Scheduled).into(), UpsertSource::Server(3))
            .unwrap();
        engine
            .record_change(key.clone(), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        assert!(engine.store().get(&key).unwrap().unwrap().is_dirty);
        engine.remote().script_pull(Ok(PullResponse {
            deleted: vec![key.clone()],
            synced_at: 10,
            ..PullResponse::default()
        }));

        let report = engine.sync(Trigger::Requested).unwrap();

        assert_eq!(report.pulled_deletes, 1);
        assert_eq!(report.superseded, 1);
        assert_eq!(report.pushed, 0);
        assert!(engine.remote().push_requests().is_empty());
        assert!(engine.store().get(&key).unwrap().is_none());
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn failed_push_counts_toward_retry_cap() {
        let engine = engine();
        engine
            .record_change(EntityKey::job("job-1"), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();

        for cycle in 1..=3 {
            engine
                .remote()
                .script_push(Err(RemoteError::Rejected("notes too long".into())));
            let report = engine.sync(Trigger::Requested).unwrap();
            assert_eq!(report.failed, 1, "cycle {cycle}");
        }

        let report = engine.sync(Trigger::Requested).unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(engine.remote().push_requests().len(), 3);
        assert_eq!(engine.failed_items().len(), 1);
        assert_eq!(
            engine.failed_items()[0].last_error.as_deref(),
            Some("rejected by server: notes too long")
        );

        assert_eq!(engine.retry_all_failed().unwrap(), 1);
        let report = engine.sync(Trigger::Requested).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn item_is_attempted_once_per_cycle() {
        let engine = engine();
        engine
            .record_change(EntityKey::job("job-1"), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        engine
            .remote()
            .script_push(Err(RemoteError::Transport("reset".into())));

        let report = engine.sync(Trigger::Requested).unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.batches, 1);
        assert_eq!(engine.remote().push_requests().len(), 1);
    }

    #[test]
    fn batch_limit_bounds_a_cycle() {
        let engine = SyncEngine::in_memory(
            SyncConfig::new().with_push_batch_size(2).with_max_push_batches(2),
            MockRemote::new(),
            MemoryEntityStore::new(),
        )
        .unwrap();
        for n in 0..7 {
            engine
                .record_change(
                    EntityKey::job(format!("job-{n}")),
                    Action::Update,
                    job(JobStatus::Completed),
                    0,
                )
                .unwrap();
        }

        let report = engine.sync(Trigger::Requested).unwrap();
        assert_eq!(report.pushed, 4);
        assert_eq!(report.batches, 2);
        assert_eq!(engine.pending_count(), 3);
    }

    #[test]
    fn push_success_uses_ack_version() {
        let engine = engine();
        let key = EntityKey::job("job-1");
        engine
            .store()
            .upsert(&key, Job::with_status(JobStatus::Scheduled).into(), UpsertSource::Server(2))
            .unwrap();
        engine
            .record_change(key.clone(), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        engine.remote().script_push(Ok(PushAck { server_version: 3 }));

        engine.sync(Trigger::Requested).unwrap();

        assert_eq!(engine.remote().push_requests()[0].expected_version, Some(2));
        let record = engine.store().get(&key).unwrap().unwrap();
        assert_eq!(record.server_version, Some(3));
        assert!(!record.is_dirty);
        assert!(engine.last_synced_at().unwrap().is_some());
    }

    #[test]
    fn listeners_see_state_changes() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = engine.subscribe(move |status| sink.lock().push(status.state));

        engine.sync(Trigger::Requested).unwrap();

        let states = seen.lock().clone();
        assert!(states.contains(&SyncState::Pulling));
        assert!(states.contains(&SyncState::Pushing));
        assert_eq!(states.last(), Some(&SyncState::Idle));

        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
    }

    #[test]
    fn clear_item_and_unknown_ids() {
        let engine = engine();
        let id = engine
            .record_change(EntityKey::job("job-1"), Action::Update, job(JobStatus::Completed), 0)
            .unwrap();
        engine.clear_item(id).unwrap();
        assert_eq!(engine.pending_count(), 0);
        assert!(matches!(engine.clear_item(id), Err(SyncError::UnknownItem(_))));
        assert!(matches!(engine.retry_failed(id), Err(SyncError::UnknownItem(_))));
        assert!(matches!(
            engine.resolve_conflict("nope", ConflictResolution::Server),
            Err(SyncError::UnknownConflict(_))
        ));
    }
}
