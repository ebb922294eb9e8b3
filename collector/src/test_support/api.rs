//! Scripted observation API and a ready-made client over it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use super::clock::{ImmediateSleeper, MutableClock};
use super::stores::InMemoryResponseCache;
use crate::domain::ports::{ApiQuery, ObservationApi, ObservationApiError};
use crate::domain::{ApiClientPorts, ClientPolicy, RateLimitedClient};

type Responder = Box<dyn Fn(&ApiQuery) -> Result<Value, ObservationApiError> + Send + Sync>;

/// Observation API answering from per-query scripts, then from a fallback.
///
/// Scripts are keyed by the query's canonical form and consumed front to
/// back. Once a script is exhausted the fallback answers.
pub struct ScriptedObservationApi {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, ObservationApiError>>>>,
    calls: Mutex<Vec<ApiQuery>>,
    fallback: Responder,
}

impl Default for ScriptedObservationApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedObservationApi {
    /// API whose fallback is an empty listing with `total_results: 0`.
    pub fn new() -> Self {
        Self::with_fallback(|_| Ok(json!({ "total_results": 0, "results": [] })))
    }

    /// API answering unscripted queries with `fallback`.
    pub fn with_fallback<F>(fallback: F) -> Self
    where
        F: Fn(&ApiQuery) -> Result<Value, ObservationApiError> + Send + Sync + 'static,
    {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fallback: Box::new(fallback),
        }
    }

    /// Queue `responses` for `query`.
    pub fn script(&self, query: &ApiQuery, responses: Vec<Result<Value, ObservationApiError>>) {
        lock(&self.scripts)
            .entry(query.canonical())
            .or_default()
            .extend(responses);
    }

    /// Every query received, in arrival order.
    pub fn calls(&self) -> Vec<ApiQuery> {
        lock(&self.calls).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("scripted API mutex"),
    }
}

#[async_trait]
impl ObservationApi for ScriptedObservationApi {
    async fn fetch_json(&self, query: &ApiQuery) -> Result<Value, ObservationApiError> {
        lock(&self.calls).push(query.clone());
        let scripted = lock(&self.scripts)
            .get_mut(&query.canonical())
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| (self.fallback)(query))
    }
}

/// Observation API that answers after a delay and records peak concurrency.
///
/// Every response reports 1000 results with one row per page.
pub struct SlowObservationApi {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowObservationApi {
    /// API taking `delay` (tokio time) per call.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObservationApi for SlowObservationApi {
    async fn fetch_json(&self, _query: &ApiQuery) -> Result<Value, ObservationApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "total_results": 1000, "results": [{}] }))
    }
}

/// Client over `api` with no spacing, no backoff waits and no effective cache.
pub fn immediate_client(api: Arc<dyn ObservationApi>) -> Arc<RateLimitedClient> {
    let clock = Utc
        .with_ymd_and_hms(2025, 5, 10, 9, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("valid fixture time"));
    Arc::new(RateLimitedClient::new(
        ApiClientPorts::new(api, Arc::new(InMemoryResponseCache::default())),
        Arc::new(MutableClock::new(clock)),
        Arc::new(ImmediateSleeper),
        ClientPolicy {
            min_request_interval: Duration::ZERO,
            cache_ttl: Duration::ZERO,
            ..ClientPolicy::default()
        },
    ))
}
