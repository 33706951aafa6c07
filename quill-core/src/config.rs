//! Configuration types

use crate::constants::{
    DEFAULT_LOCK_LEASE_MS, DEFAULT_LOCK_POLL_INTERVAL_MS, DEFAULT_LOCK_WAIT_MS, MAX_LOCK_LEASE_MS,
};
use crate::error::{ConfigError, QuillResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the family lock protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuillConfig {
    /// TTL of a family lock. A lock abandoned by a crashed or cancelled
    /// mutation disappears after this long.
    pub lock_lease: Duration,
    /// How long a mutation waits for a busy family lock before failing.
    pub lock_wait: Duration,
    /// Interval between acquisition attempts while waiting.
    pub lock_poll_interval: Duration,
    /// Sweep the family cache a second time after the write commits.
    /// Needed when the cache service cannot hold back population while a
    /// family is locked.
    pub post_write_invalidation: bool,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            lock_lease: Duration::from_millis(DEFAULT_LOCK_LEASE_MS),
            lock_wait: Duration::from_millis(DEFAULT_LOCK_WAIT_MS),
            lock_poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_INTERVAL_MS),
            post_write_invalidation: true,
        }
    }
}

impl QuillConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create QuillConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `QUILL_LOCK_LEASE_MS`: Family lock TTL (default: 30000)
    /// - `QUILL_LOCK_WAIT_MS`: Bounded wait for a busy lock (default: 5000)
    /// - `QUILL_LOCK_POLL_INTERVAL_MS`: Retry interval while waiting (default: 25)
    /// - `QUILL_POST_WRITE_INVALIDATION`: Second sweep after commit (default: true)
    pub fn from_env() -> Self {
        let lock_lease = Duration::from_millis(env_u64("QUILL_LOCK_LEASE_MS", DEFAULT_LOCK_LEASE_MS));
        let lock_wait = Duration::from_millis(env_u64("QUILL_LOCK_WAIT_MS", DEFAULT_LOCK_WAIT_MS));
        let lock_poll_interval = Duration::from_millis(env_u64(
            "QUILL_LOCK_POLL_INTERVAL_MS",
            DEFAULT_LOCK_POLL_INTERVAL_MS,
        ));
        let post_write_invalidation = std::env::var("QUILL_POST_WRITE_INVALIDATION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Self {
            lock_lease,
            lock_wait,
            lock_poll_interval,
            post_write_invalidation,
        }
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn with_post_write_invalidation(mut self, enabled: bool) -> Self {
        self.post_write_invalidation = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - all durations are positive
    /// - `lock_lease` does not exceed [`MAX_LOCK_LEASE_MS`]
    /// - `lock_wait` does not exceed `lock_lease`
    /// - `lock_poll_interval` does not exceed `lock_wait`
    pub fn validate(&self) -> QuillResult<()> {
        for (field, value) in [
            ("lock_lease", self.lock_lease),
            ("lock_wait", self.lock_wait),
            ("lock_poll_interval", self.lock_poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: format!("{} must be positive", field),
                }
                .into());
            }
        }

        if self.lock_lease > Duration::from_millis(MAX_LOCK_LEASE_MS) {
            return Err(ConfigError::InvalidValue {
                field: "lock_lease".to_string(),
                value: format!("{:?}", self.lock_lease),
                reason: format!("lock_lease must not exceed {} ms", MAX_LOCK_LEASE_MS),
            }
            .into());
        }

        if self.lock_wait > self.lock_lease {
            return Err(ConfigError::InvalidValue {
                field: "lock_wait".to_string(),
                value: format!("{:?}", self.lock_wait),
                reason: "lock_wait must not exceed lock_lease".to_string(),
            }
            .into());
        }

        if self.lock_poll_interval > self.lock_wait {
            return Err(ConfigError::InvalidValue {
                field: "lock_poll_interval".to_string(),
                value: format!("{:?}", self.lock_poll_interval),
                reason: "lock_poll_interval must not exceed lock_wait".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
