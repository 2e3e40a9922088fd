use std::time::Duration;

use crate::error::StoreError;

/// Configuration for [`AsyncPageStore`](crate::store::AsyncPageStore).
///
/// Controls the backpressure threshold, flush parallelism, retry pacing and
/// how long shutdown waits for callers still inside the store.
#[derive(Debug, Clone)]
pub struct AsyncStoreConfig {
    /// Maximum number of distinct keys awaiting or undergoing a flush.
    /// Once reached, new keys are persisted synchronously by the caller.
    pub capacity: usize,
    /// Number of background flush workers.
    pub worker_count: usize,
    /// Pause before retrying a failed flush. Doubles with every consecutive
    /// failure of the same page.
    pub retry_backoff: Duration,
    /// Ceiling for the doubled retry pause.
    pub max_retry_backoff: Duration,
    /// Upper bound on how long `shutdown()` waits for in-flight caller
    /// operations before closing the backend.
    pub drain_timeout: Duration,
}

impl AsyncStoreConfig {
    /// Creates a config with the given capacity and defaults for everything else.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Checks that every tunable is positive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "capacity must be positive".to_string(),
            });
        }
        if self.worker_count == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "worker_count must be positive".to_string(),
            });
        }
        if self.retry_backoff.is_zero() {
            return Err(StoreError::InvalidConfig {
                reason: "retry_backoff must be positive".to_string(),
            });
        }
        if self.max_retry_backoff < self.retry_backoff {
            return Err(StoreError::InvalidConfig {
                reason: "max_retry_backoff must not be below retry_backoff".to_string(),
            });
        }
        Ok(())
    }

    /// Pause before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_retry_backoff)
    }
}

impl Default for AsyncStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            worker_count: 1,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
        }
    }
}
