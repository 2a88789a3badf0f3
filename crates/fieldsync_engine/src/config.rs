//! Configuration for the sync engine.

use fieldsync_protocol::{ConflictPolicy, EntityKind};
use rand::Rng;
use std::time::Duration;

/// Default number of queue items pushed per batch.
pub const DEFAULT_PUSH_BATCH: usize = 10;

/// Default number of push batches per cycle.
pub const DEFAULT_MAX_PUSH_BATCHES: usize = 5;

/// Default number of dead journal records tolerated before compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1024;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entity kinds requested on pull.
    pub entity_kinds: Vec<EntityKind>,
    /// Maximum queue items per push batch.
    pub push_batch_size: usize,
    /// Maximum push batches per cycle.
    pub max_push_batches_per_cycle: usize,
    /// Retry configuration for rate-limited calls.
    pub retry: RetryConfig,
    /// How push conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Interval for periodic sync while online.
    pub sync_interval: Option<Duration>,
    /// Request timeout handed to the HTTP client by [`crate::HttpRemote::from_config`].
    pub timeout: Duration,
    /// Dead journal records tolerated before compaction.
    pub compaction_threshold: usize,
}

impl SyncConfig {
    /// Creates a configuration that syncs every entity kind.
    pub fn new() -> Self {
        Self {
            entity_kinds: EntityKind::ALL.to_vec(),
            push_batch_size: DEFAULT_PUSH_BATCH,
            max_push_batches_per_cycle: DEFAULT_MAX_PUSH_BATCHES,
            retry: RetryConfig::default(),
            conflict_policy: ConflictPolicy::ServerWins,
            sync_interval: None,
            timeout: Duration::from_secs(30),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }

    /// Sets the entity kinds requested on pull.
    pub fn with_entity_kinds(mut self, kinds: Vec<EntityKind>) -> Self {
        self.entity_kinds = kinds;
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the maximum number of push batches per cycle.
    pub fn with_max_push_batches(mut self, batches: usize) -> Self {
        self.max_push_batches_per_cycle = batches.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the sync interval for periodic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed).
    ///
    /// `initial_delay * multiplier^attempt`, plus jitter when enabled, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        let jittered = if self.add_jitter && base > 0.0 {
            base + base * 0.25 * rand::thread_rng().gen_range(0.0..=1.0)
        } else {
            base
        };
        let nanos = jittered.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(nanos as u64)
    }

    /// Like [`RetryConfig::delay_for_attempt`], raised to at least the server's hint.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match hint {
            Some(hint) if hint > delay => hint.min(self.max_delay),
            _ => delay,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
