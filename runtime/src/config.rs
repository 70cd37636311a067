//! Engine-wide configuration.

use std::time::Duration;

/// Tunables for a [`crate::engine::ProjectionEngine`].
///
/// Constructed via [`EngineConfigBuilder`], mirroring the
/// `RetryPolicy`/`RetryPolicyBuilder` builder shape used elsewhere in
/// this crate.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of optimistic-publish retries the locking
    /// coordinator attempts before giving up with
    /// [`factflow_core::CoreError::ConcurrentModification`] surfaced as
    /// `LockExceededError`.
    pub lock_retry_bound: u32,
    /// How often `subscribe_and_block` polls for write-token renewal.
    ///
    /// Replaces a hardcoded five-minute sleep with a configurable
    /// interval; the default preserves that original cadence.
    pub token_renewal_interval: Duration,
    /// Default `max_wait` for a catchup subscription when the caller
    /// does not specify one explicitly. `None` means wait forever.
    pub default_catchup_max_wait: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_retry_bound: 5,
            token_renewal_interval: Duration::from_secs(300),
            default_catchup_max_wait: None,
        }
    }
}

impl EngineConfig {
    /// Start a builder pre-populated with defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder(Self::default())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder(EngineConfig);

impl EngineConfigBuilder {
    /// Set the optimistic-publish retry bound.
    #[must_use]
    pub const fn lock_retry_bound(mut self, bound: u32) -> Self {
        self.0.lock_retry_bound = bound;
        self
    }

    /// Set the write-token renewal polling interval.
    #[must_use]
    pub const fn token_renewal_interval(mut self, interval: Duration) -> Self {
        self.0.token_renewal_interval = interval;
        self
    }

    /// Set the default catchup `max_wait`.
    #[must_use]
    pub const fn default_catchup_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.0.default_catchup_max_wait = max_wait;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preserves_five_minute_token_cadence() {
        let config = EngineConfig::default();
        assert_eq!(config.token_renewal_interval, Duration::from_secs(300));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::builder()
            .lock_retry_bound(10)
            .token_renewal_interval(Duration::from_secs(30))
            .build();

        assert_eq!(config.lock_retry_bound, 10);
        assert_eq!(config.token_renewal_interval, Duration::from_secs(30));
    }
}
