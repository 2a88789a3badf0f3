//! Transport policy: bounded retry with backoff for remote calls.

use crate::config::RetryConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::RemoteSyncApi;
use fieldsync_protocol::{EntityData, PushAck, PushRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Blocks the calling thread between retries.
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far.
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}

/// Classified result of pushing one queue item.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The server accepted the write.
    Success(PushAck),
    /// The server holds a newer version.
    Conflict {
        /// Current server version.
        server_version: u64,
        /// Current server data, if reported.
        server_data: Option<EntityData>,
    },
    /// Still rate limited after the retry budget was spent.
    RateLimited {
        /// Last server hint.
        retry_after: Option<Duration>,
    },
    /// Any other failure.
    Failed(String),
}

/// Wraps remote calls with bounded, classified retry.
///
/// Only outcomes matching the retry predicate (rate limits by default) are
/// retried; conflicts and every other error pass straight through.
pub struct TransportPolicy {
    retry: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    retryable: fn(&RemoteError) -> bool,
}

impl TransportPolicy {
    /// Creates a policy that retries rate limits with real sleeps.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            sleeper: Arc::new(ThreadSleeper),
            retryable: RemoteError::is_rate_limited,
        }
    }

    /// Replaces the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replaces the predicate deciding which errors are retried.
    #[must_use]
    pub fn with_retry_predicate(mut self, retryable: fn(&RemoteError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Returns the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Runs `op`, retrying retryable failures up to `max_attempts` times.
    ///
    /// Returns the last error once the budget is spent.
    pub fn call<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if (self.retryable)(&err) && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_with_hint(attempt, err.retry_after());
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying remote call"
                    );
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if (self.retryable)(&err) {
                        warn!(operation, attempts = attempt + 1, "retry budget exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Pushes one mutation and classifies the result.
    pub fn push<R: RemoteSyncApi + ?Sized>(&self, remote: &R, request: &PushRequest) -> PushOutcome {
        let outcome = Self::classify_push(self.call("push", || remote.push(request)));
        debug!(entity = %request.key, outcome = ?outcome, "push classified");
        outcome
    }

    /// Maps a push result to the outcome the engine acts on.
    pub fn classify_push(result: RemoteResult<PushAck>) -> PushOutcome {
        match result {
            Ok(ack) => PushOutcome::Success(ack),
            Err(RemoteError::Conflict {
                server_version,
                server_data,
            }) => PushOutcome::Conflict {
                server_version,
                server_data,
            },
            Err(RemoteError::RateLimited { retry_after }) => PushOutcome::RateLimited { retry_after },
            Err(other) => PushOutcome::Failed(other.to_string()),
        }
    }
}

impl std::fmt::Debug for TransportPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPolicy")
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(sleeper: &Arc<RecordingSleeper>) -> TransportPolicy {
        TransportPolicy::new(RetryConfig::new(3).with_initial_delay(Duration::from_millis(100)))
            .with_sleeper(sleeper.clone())
    }

    fn limited() -> RemoteError {
        RemoteError::RateLimited { retry_after: None }
    }

    #[test]
    fn rate_limits_are_retried_with_doubling_backoff() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = Cell::new(0);

        let result: RemoteResult<u32> = policy(&sleeper).call("test", || {
            calls.set(calls.get() + 1);
            Err(limited())
        });

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.get(), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn recovers_when_limit_lifts() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = Cell::new(0);

        let result = policy(&sleeper).call("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(limited())
            } else {
                Ok(7)
            }
        });

        assert_eq!(result, Ok(7));
        assert_eq!(sleeper.recorded().len(), 1);
    }

    #[test]
    fn other_errors_pass_through_without_retry() {
        let sleeper = Arc::new(RecordingSleeper::new());
        for err in [
            RemoteError::Conflict {
                server_version: 4,
                server_data: None,
            },
            RemoteError::Transport("reset".into()),
            RemoteError::Rejected("bad payload".into()),
        ] {
            let calls = Cell::new(0);
            let result: RemoteResult<()> = policy(&sleeper).call("test", || {
                calls.set(calls.get() + 1);
                Err(err.clone())
            });
            assert_eq!(result, Err(err));
            assert_eq!(calls.get(), 1);
        }
        assert!(sleeper.recorded().is_empty());
    }

    #[test]
    fn retry_after_hint_is_honored() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let result: RemoteResult<()> = policy(&sleeper).call("test", || {
            Err(RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            })
        });
        assert!(result.is_err());
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(2), Duration::from_secs(2)]
        );
    }

    #[test]
    fn custom_predicate_retries_transport_errors() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = Cell::new(0);
        let result: RemoteResult<()> = policy(&sleeper)
            .with_retry_predicate(|err| matches!(err, RemoteError::Transport(_)))
            .call("test", || {
                calls.set(calls.get() + 1);
                Err(RemoteError::Transport("reset".into()))
            });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn classify_push_outcomes() {
        assert_eq!(
            TransportPolicy::classify_push(Ok(PushAck { server_version: 2 })),
            PushOutcome::Success(PushAck { server_version: 2 })
        );
        assert!(matches!(
            TransportPolicy::classify_push(Err(RemoteError::Conflict {
                server_version: 4,
                server_data: None
            })),
            PushOutcome::Conflict {
                server_version: 4,
                ..
            }
        ));
        assert!(matches!(
            TransportPolicy::classify_push(Err(limited())),
            PushOutcome::RateLimited { .. }
        ));
        assert_eq!(
            TransportPolicy::classify_push(Err(RemoteError::NotFound)),
            PushOutcome::Failed("entity not found".into())
        );
    }
}
