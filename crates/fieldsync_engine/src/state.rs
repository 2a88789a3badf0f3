//! Engine state, cycle reports and status snapshots.

use fieldsync_protocol::Timestamp;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No cycle is running.
    Idle,
    /// Pull phase in progress.
    Pulling,
    /// Push phase in progress.
    Pushing,
    /// The last cycle failed; a new trigger may start another.
    Error,
}

impl SyncState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }

    /// Returns true if a new cycle may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Error)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncState::Idle => "idle",
            SyncState::Pulling => "pulling",
            SyncState::Pushing => "pushing",
            SyncState::Error => "error",
        })
    }
}

/// Why a cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The device went from offline to online.
    ConnectivityRestored,
    /// The app came to the foreground while online.
    AppForegrounded,
    /// Explicit request (pull-to-refresh, submit button).
    Requested,
    /// The periodic timer fired.
    Periodic,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::ConnectivityRestored => "connectivity_restored",
            Trigger::AppForegrounded => "app_foregrounded",
            Trigger::Requested => "requested",
            Trigger::Periodic => "periodic",
        })
    }
}

/// What one call to [`crate::SyncEngine::sync`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// What started the cycle.
    pub trigger: Trigger,
    /// True if another cycle was running and this trigger was dropped.
    pub skipped: bool,
    /// Pulled entities written locally.
    pub pulled_updates: usize,
    /// Pulled deletions applied locally.
    pub pulled_deletes: usize,
    /// Pulled entities ignored because a dirty local copy won.
    pub skipped_dirty: usize,
    /// Pending mutations dropped because a pull replaced or deleted their entity.
    pub superseded: usize,
    /// True if the pull was rate limited and the push phase was skipped.
    pub pull_rate_limited: bool,
    /// Queue items accepted by the server.
    pub pushed: usize,
    /// Queue items that hit a version conflict.
    pub conflicts: usize,
    /// Queue items marked failed.
    pub failed: usize,
    /// True if the push phase paused on a rate limit.
    pub rate_limited: bool,
    /// Push batches processed.
    pub batches: usize,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    pub(crate) fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            skipped: false,
            pulled_updates: 0,
            pulled_deletes: 0,
            skipped_dirty: 0,
            superseded: 0,
            pull_rate_limited: false,
            pushed: 0,
            conflicts: 0,
            failed: 0,
            rate_limited: false,
            batches: 0,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn skipped(trigger: Trigger) -> Self {
        Self {
            skipped: true,
            ..Self::new(trigger)
        }
    }
}

/// Counters across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles that ended with an error.
    pub cycles_failed: u64,
    /// Triggers dropped because a cycle was running.
    pub cycles_skipped: u64,
    /// Entities written by pulls.
    pub entities_pulled: u64,
    /// Mutations accepted by the server.
    pub mutations_pushed: u64,
    /// Conflicts encountered.
    pub conflicts_encountered: u64,
    /// Last cycle error message.
    pub last_error: Option<String>,
}

/// Read-only snapshot for badges and sync indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Engine state.
    pub state: SyncState,
    /// All queued items, including failed ones.
    pub pending_count: usize,
    /// Items at the retry cap.
    pub failed_count: usize,
    /// Conflicts awaiting a decision.
    pub unresolved_conflicts: usize,
    /// Last successful reconciliation.
    pub last_synced_at: Option<Timestamp>,
    /// Pull cursor.
    pub cursor: Timestamp,
    /// Error from the last failed cycle.
    pub last_error: Option<String>,
}
