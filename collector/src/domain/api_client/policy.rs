//! Retry, caching and fan-out limits for the rate-limited client.

use std::num::NonZeroU32;
use std::time::Duration;

const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(500) {
    Some(size) => size,
    None => NonZeroU32::MIN,
};

/// Client configuration controlling spacing, retries and caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPolicy {
    /// Minimum spacing between two outbound requests.
    pub min_request_interval: Duration,
    /// Maximum call attempts per request (including the first call).
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_base: u32,
    /// Maximum age of a reusable cached response.
    pub cache_ttl: Duration,
    /// Concurrent page requests when draining a listing.
    pub max_in_flight: usize,
    /// Entries requested per listing page.
    pub page_size: NonZeroU32,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            min_request_interval: Duration::from_secs(1),
            max_attempts: 3,
            backoff_base: 2,
            cache_ttl: Duration::from_secs(30 * 60),
            max_in_flight: 3,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ClientPolicy {
    /// Delay before retrying after failed attempt number `attempt` (one-based).
    ///
    /// The first retry waits `base^0` seconds, the second `base^1`, and so on.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use collector::domain::ClientPolicy;
    ///
    /// let policy = ClientPolicy::default();
    /// assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
    /// assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
    /// assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
    /// ```
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        Duration::from_secs(u64::from(self.backoff_base).saturating_pow(exponent))
    }

    pub(super) fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub(super) fn fan_out(&self) -> usize {
        self.max_in_flight.max(1)
    }
}
