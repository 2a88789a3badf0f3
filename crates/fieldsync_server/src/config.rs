//! Server configuration.

use std::num::NonZeroU32;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum entities returned by one pull.
    pub max_pull_batch: usize,
    /// Requests allowed per minute across all clients. `None` disables limiting.
    pub requests_per_minute: Option<NonZeroU32>,
}

impl ServerConfig {
    /// Creates a configuration with no rate limit.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            requests_per_minute: None,
        }
    }

    /// Sets the maximum pull batch size. Zero is treated as one.
    pub fn with_max_pull_batch(mut self, size: usize) -> Self {
        self.max_pull_batch = size.max(1);
        self
    }

    /// Limits requests per minute. Zero disables limiting.
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = NonZeroU32::new(requests_per_minute);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
