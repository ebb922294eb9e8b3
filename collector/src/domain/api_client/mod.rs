//! Rate-limited, retrying and caching client over the observation API port.
//!
//! Every outbound call goes through one [`RateLimitedClient`]: a fresh cache
//! hit is returned without touching the network or the throttle; otherwise
//! the call waits for a throttle slot and is retried with exponential backoff
//! while the failure stays retryable. At most `max_in_flight` calls are
//! outstanding at once, however many aggregations share the client.
//! Failures never escape as panics or aborts: callers receive an
//! [`ApiFailure`] and decide on a zero default.

use std::num::NonZeroU32;
use std::sync::Arc;

use futures_util::{StreamExt, stream};
use mockable::Clock;
use pagination::PagePlan;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::runtime::Sleeper;
use super::throttle::RequestThrottle;
use crate::domain::ports::{
    ApiQuery, CacheKey, CachedResponse, ObservationApi, ObservationApiError, ResponseCache,
};

mod policy;

pub use policy::ClientPolicy;

/// Final failure of one logical request after all attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct ApiFailure {
    /// Number of calls made.
    pub attempts: u32,
    /// Error returned by the last call.
    pub error: ObservationApiError,
}

/// Port bundle required by the client.
pub struct ApiClientPorts {
    /// Outbound observation API adapter.
    pub api: Arc<dyn ObservationApi>,
    /// Response cache adapter.
    pub cache: Arc<dyn ResponseCache>,
}

impl ApiClientPorts {
    /// Build a strongly-typed client port bundle.
    pub fn new(api: Arc<dyn ObservationApi>, cache: Arc<dyn ResponseCache>) -> Self {
        Self { api, cache }
    }
}

/// Domain-owned client wrapping the observation API with policy.
pub struct RateLimitedClient {
    api: Arc<dyn ObservationApi>,
    cache: Arc<dyn ResponseCache>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    throttle: RequestThrottle,
    in_flight: Semaphore,
    policy: ClientPolicy,
}

/// Rows of a paginated listing, with a hole for every page that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pages: Vec<Option<Vec<Value>>>,
}

impl Listing {
    /// Whether every page of the listing arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pages.iter().all(Option::is_some)
    }

    /// Rows of every page that arrived, in page order.
    #[must_use]
    pub fn into_rows(self) -> Vec<Value> {
        self.pages.into_iter().flatten().flatten().collect()
    }

    /// Rows of the pages before the first missing one.
    ///
    /// For listings ordered by an ascending key this never skips a key range.
    #[must_use]
    pub fn into_leading_rows(self) -> Vec<Value> {
        self.pages.into_iter().map_while(|page| page).flatten().collect()
    }
}

impl RateLimitedClient {
    /// Build a client from its ports, time sources and policy.
    /// ```rust,ignore
    /// let client = RateLimitedClient::new(ports, clock, sleeper, ClientPolicy::default());
    /// ```
    pub fn new(
        ports: ApiClientPorts,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        policy: ClientPolicy,
    ) -> Self {
        let throttle = RequestThrottle::new(
            Arc::clone(&clock),
            Arc::clone(&sleeper),
            policy.min_request_interval,
        );
        Self {
            api: ports.api,
            cache: ports.cache,
            clock,
            sleeper,
            throttle,
            in_flight: Semaphore::new(policy.fan_out()),
            policy,
        }
    }

    /// Active policy.
    pub fn policy(&self) -> &ClientPolicy {
        &self.policy
    }

    /// Issue `query`, consulting the cache first and retrying transient failures.
    ///
    /// The returned document is guaranteed to carry an integer `total_results`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiFailure`] once a non-retryable error occurs or the attempt
    /// limit is exhausted.
    pub async fn request(&self, query: &ApiQuery) -> Result<Value, ApiFailure> {
        let key = CacheKey::for_query(query);
        if let Some(body) = self.fresh_cached(&key).await {
            debug!(query = %query, "serving API response from cache");
            return Ok(body);
        }

        let max_attempts = self.policy.attempt_limit();
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let outcome = match self.in_flight.acquire().await {
                Ok(_permit) => match self.throttle.acquire().await {
                    Ok(_) => self.single_attempt(query).await,
                    Err(error) => Err(ObservationApiError::transport(error.to_string())),
                },
                Err(error) => Err(ObservationApiError::transport(error.to_string())),
            };

            match outcome {
                Ok(body) => {
                    self.store(&key, &body).await;
                    return Ok(body);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        query = %query,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "API request failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    last_error = Some(error);
                }
                Err(error) => {
                    warn!(query = %query, attempt, error = %error, "API request failed");
                    return Err(ApiFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }

        Err(ApiFailure {
            attempts: max_attempts,
            error: last_error.unwrap_or_else(|| {
                ObservationApiError::transport("retry loop ended without a response")
            }),
        })
    }

    /// `total_results` reported for `query`, or `0` when the request fails.
    pub async fn total_results(&self, query: &ApiQuery) -> u64 {
        match self.request(query).await {
            Ok(body) => total_of(&body),
            Err(failure) => {
                warn!(query = %query, error = %failure, "substituting zero for failed count");
                0
            }
        }
    }

    /// Every entry of a paginated listing, in page order.
    ///
    /// Page 1 reveals `total_results`; the remaining pages are fetched with
    /// bounded parallelism and reassembled by page number. A failed page is
    /// logged and contributes no rows.
    pub async fn fetch_all_results(&self, query: &ApiQuery) -> Vec<Value> {
        self.fetch_listing(query, self.policy.page_size)
            .await
            .into_rows()
    }

    /// Drain a listing `per_page` entries at a time, keeping track of the
    /// pages that could not be fetched.
    ///
    /// A failed first page yields an incomplete, empty listing.
    pub async fn fetch_listing(&self, query: &ApiQuery, per_page: NonZeroU32) -> Listing {
        let page_query = |page: u32| {
            query
                .clone()
                .with_param("per_page", per_page)
                .with_param("page", page)
        };

        let first = match self.request(&page_query(1)).await {
            Ok(body) => body,
            Err(failure) => {
                warn!(query = %query, error = %failure, "listing unavailable, treating as empty");
                return Listing { pages: vec![None] };
            }
        };
        let plan = PagePlan::new(total_of(&first), per_page);
        debug!(
            query = %query,
            total_results = plan.total_results(),
            pages = plan.page_count(),
            "draining paginated listing"
        );

        let mut pages = vec![(1, Some(results_of(first)))];
        let remaining = stream::iter(plan.remaining_pages())
            .map(|page| {
                let paged = page_query(page);
                async move { (page, self.request(&paged).await) }
            })
            .buffer_unordered(self.policy.fan_out())
            .collect::<Vec<_>>()
            .await;

        for (page, outcome) in remaining {
            match outcome {
                Ok(body) => pages.push((page, Some(results_of(body)))),
                Err(failure) => {
                    warn!(query = %query, page, error = %failure, "listing page unavailable");
                    pages.push((page, None));
                }
            }
        }

        pages.sort_by_key(|(page, _)| *page);
        Listing {
            pages: pages.into_iter().map(|(_, rows)| rows).collect(),
        }
    }

    async fn single_attempt(&self, query: &ApiQuery) -> Result<Value, ObservationApiError> {
        let body = self.api.fetch_json(query).await?;
        match body.get("total_results") {
            Some(total) if total.is_u64() => Ok(body),
            Some(_) => Err(ObservationApiError::decode(
                "`total_results` is not a non-negative integer",
            )),
            None => Err(ObservationApiError::decode(
                "response is missing `total_results`",
            )),
        }
    }

    async fn fresh_cached(&self, key: &CacheKey) -> Option<Value> {
        match self.cache.get(key).await {
            Ok(Some(entry)) if entry.is_fresh_at(self.clock.utc()) => Some(entry.body),
            Ok(_) => None,
            Err(error) => {
                warn!(key = %key, error = %error, "response cache read failed");
                None
            }
        }
    }

    async fn store(&self, key: &CacheKey, body: &Value) {
        let entry = CachedResponse::new(body.clone(), self.clock.utc(), self.policy.cache_ttl);
        if let Err(error) = self.cache.put(key, &entry).await {
            warn!(key = %key, error = %error, "response cache write failed");
        }
    }
}

/// `total_results` of a validated response document, `0` when absent.
pub fn total_of(body: &Value) -> u64 {
    body.get("total_results").and_then(Value::as_u64).unwrap_or(0)
}

/// Take the `results` array out of a response document.
pub fn results_of(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests;
