//! Process-wide minimum spacing between outbound API requests.
//!
//! The throttle hands out request slots. Reserving a slot and recording it as
//! the latest one happen under a single lock, so concurrent callers queue up
//! behind each other instead of bursting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tracing::debug;

use super::Error;
use super::runtime::Sleeper;

/// Spacing service for outbound requests.
pub struct RequestThrottle {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    min_interval: Duration,
    last_slot: Mutex<Option<DateTime<Utc>>>,
}

impl RequestThrottle {
    /// Build a throttle enforcing `min_interval` between request slots.
    pub fn new(clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>, min_interval: Duration) -> Self {
        Self {
            clock,
            sleeper,
            min_interval,
            last_slot: Mutex::new(None),
        }
    }

    /// Configured minimum spacing.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next free slot and return how long the caller waited.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the slot lock is poisoned.
    pub async fn acquire(&self) -> Result<Duration, Error> {
        let wait = self.reserve_slot()?;
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis(), "throttling API request");
            self.sleeper.sleep(wait).await;
        }
        Ok(wait)
    }

    fn reserve_slot(&self) -> Result<Duration, Error> {
        let interval = TimeDelta::from_std(self.min_interval).unwrap_or(TimeDelta::MAX);
        let mut last_slot = self
            .last_slot
            .lock()
            .map_err(|_| Error::internal("request throttle state poisoned"))?;
        let now = self.clock.utc();
        let slot = match *last_slot {
            Some(previous) => previous
                .checked_add_signed(interval)
                .map_or(now, |earliest| earliest.max(now)),
            None => now,
        };
        *last_slot = Some(slot);
        Ok((slot - now).to_std().unwrap_or(Duration::ZERO))
    }
}
