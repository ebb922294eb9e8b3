//! Port interface for caching raw API responses.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CacheKey, define_port_error};

define_port_error! {
    /// Errors surfaced by the caching adapter.
    pub enum ResponseCacheError {
        /// Cache backend is unavailable or failing.
        Backend { message: String } => "response cache backend failure: {message}",
        /// Serialisation or deserialisation of cached content failed.
        Serialization { message: String } => "response cache serialisation failed: {message}",
    }
}

/// One cached API response with its storage time and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    /// When the response was stored.
    pub stored_at: DateTime<Utc>,
    /// First instant at which the entry is stale.
    pub expires_at: DateTime<Utc>,
    /// Decoded response body.
    pub body: Value,
}

impl CachedResponse {
    /// Wrap `body` stored at `stored_at` and valid for `ttl`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use chrono::{TimeZone, Utc};
    /// use collector::domain::ports::CachedResponse;
    /// use serde_json::json;
    ///
    /// let stored_at = Utc.with_ymd_and_hms(2025, 5, 10, 9, 0, 0).single().expect("valid time");
    /// let entry = CachedResponse::new(json!({"total_results": 3}), stored_at, Duration::from_secs(1800));
    /// assert!(entry.is_fresh_at(stored_at + chrono::TimeDelta::minutes(29)));
    /// assert!(!entry.is_fresh_at(stored_at + chrono::TimeDelta::minutes(30)));
    /// ```
    pub fn new(body: Value, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            stored_at,
            expires_at,
            body,
        }
    }

    /// Whether the entry's age at `now` is below its time-to-live.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Key-value store for API responses.
///
/// Freshness is decided by the caller; adapters may return stale entries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Read the entry stored under `key`.
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, ResponseCacheError>;

    /// Store `entry` under `key`, replacing any previous entry.
    async fn put(&self, key: &CacheKey, entry: &CachedResponse) -> Result<(), ResponseCacheError>;
}
