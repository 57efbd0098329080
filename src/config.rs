// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timing configuration for the relay.

use std::time::Duration;

/// Fixed-delay retry policy.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hubrelay::config::RetryPolicy;
///
/// // Five attempts, three seconds apart
/// let policy = RetryPolicy::new(5, Duration::from_secs(3));
/// assert!(policy.should_retry(4));
/// assert!(!policy.should_retry(5));
///
/// // Retry forever
/// let policy = RetryPolicy::forever(Duration::from_secs(5));
/// assert!(policy.should_retry(1_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (None = infinite).
    pub attempts: Option<u32>,
    /// Delay between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a bounded policy. At least one attempt is always made.
    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: Some(attempts.max(1)),
            delay,
        }
    }

    /// Creates an unbounded policy.
    #[must_use]
    pub fn forever(delay: Duration) -> Self {
        Self {
            attempts: None,
            delay,
        }
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts.max(1));
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns true if another attempt may follow `attempt` failed ones.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.attempts.is_none_or(|max| attempt < max)
    }
}

/// Timings of the subscription engine.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hubrelay::config::{RelayConfig, RetryPolicy};
///
/// let config = RelayConfig::default()
///     .with_refresh_interval(Duration::from_secs(60))
///     .with_delivery_retry(RetryPolicy::new(3, Duration::from_secs(1)));
///
/// assert_eq!(config.scavenge_interval(), RelayConfig::DEFAULT_SCAVENGE_INTERVAL);
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    delivery_retry: RetryPolicy,
    resubscribe_delay: Duration,
    refresh_interval: Duration,
    scavenge_interval: Duration,
    storage_retry_delay: Duration,
    http_timeout: Duration,
}

impl RelayConfig {
    /// Default number of attempts per callback delivery.
    pub const DEFAULT_DELIVERY_ATTEMPTS: u32 = 5;
    /// Default delay between two delivery attempts.
    pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::from_secs(3);
    /// Default delay before a failed tracking pipeline restarts.
    pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);
    /// Default interval at which the last status is sent again.
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default interval between two scavenging passes.
    pub const DEFAULT_SCAVENGE_INTERVAL: Duration = Duration::from_secs(15 * 60);
    /// Default delay before the registry observation restarts after an error.
    pub const DEFAULT_STORAGE_RETRY_DELAY: Duration = Duration::from_secs(5);
    /// Default timeout of one outbound HTTP request.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration with default timings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-callback delivery retry policy.
    #[must_use]
    pub fn with_delivery_retry(mut self, policy: RetryPolicy) -> Self {
        self.delivery_retry = policy;
        self
    }

    /// Sets the delay before a failed tracking pipeline restarts.
    #[must_use]
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Sets the keep-alive interval of tracked devices.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the interval between scavenging passes.
    #[must_use]
    pub fn with_scavenge_interval(mut self, interval: Duration) -> Self {
        self.scavenge_interval = interval;
        self
    }

    /// Sets the delay before the registry observation restarts.
    #[must_use]
    pub fn with_storage_retry_delay(mut self, delay: Duration) -> Self {
        self.storage_retry_delay = delay;
        self
    }

    /// Sets the outbound HTTP request timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Returns the delivery retry policy.
    #[must_use]
    pub fn delivery_retry(&self) -> RetryPolicy {
        self.delivery_retry
    }

    /// Returns the resubscribe delay.
    #[must_use]
    pub fn resubscribe_delay(&self) -> Duration {
        self.resubscribe_delay
    }

    /// Returns the refresh interval.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Returns the scavenge interval.
    #[must_use]
    pub fn scavenge_interval(&self) -> Duration {
        self.scavenge_interval
    }

    /// Returns the storage retry delay.
    #[must_use]
    pub fn storage_retry_delay(&self) -> Duration {
        self.storage_retry_delay
    }

    /// Returns the HTTP timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delivery_retry: RetryPolicy::new(
                Self::DEFAULT_DELIVERY_ATTEMPTS,
                Self::DEFAULT_DELIVERY_DELAY,
            ),
            resubscribe_delay: Self::DEFAULT_RESUBSCRIBE_DELAY,
            refresh_interval: Self::DEFAULT_REFRESH_INTERVAL,
            scavenge_interval: Self::DEFAULT_SCAVENGE_INTERVAL,
            storage_retry_delay: Self::DEFAULT_STORAGE_RETRY_DELAY,
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
        }
    }
}
