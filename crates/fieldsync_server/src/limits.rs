//! Request rate limiting.

use crate::error::{ServerError, ServerResult};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Global request limiter shared by every endpoint.
pub struct RequestLimits {
    limiter: Option<DirectLimiter>,
    clock: DefaultClock,
}

impl RequestLimits {
    /// Creates a limiter admitting `per_minute` requests per minute, or an
    /// unlimited one for `None`.
    pub fn new(per_minute: Option<NonZeroU32>) -> Self {
        Self {
            limiter: per_minute.map(|n| RateLimiter::direct(Quota::per_minute(n))),
            clock: DefaultClock::default(),
        }
    }

    /// Admits one request or reports how long to wait.
    pub fn check(&self) -> ServerResult<()> {
        match &self.limiter {
            None => Ok(()),
            Some(limiter) => limiter.check().map_err(|not_until| ServerError::RateLimited {
                retry_after: not_until.wait_time_from(self.clock.now()),
            }),
        }
    }
}

impl std::fmt::Debug for RequestLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimits")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}
