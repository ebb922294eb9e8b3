//! Unit tests for the rate-limited client's cache, retry and paging rules.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::{ApiClientPorts, ClientPolicy, RateLimitedClient};
use crate::domain::ports::{
    ApiQuery, CacheKey, CachedResponse, Endpoint, MockResponseCache, ObservationApiError,
    ResponseCache, ResponseCacheError,
};
use crate::test_support::api::{ScriptedObservationApi, SlowObservationApi, immediate_client};
use crate::test_support::clock::{MutableClock, RecordingSleeper};
use crate::test_support::stores::InMemoryResponseCache;

struct Harness {
    api: Arc<ScriptedObservationApi>,
    cache: Arc<InMemoryResponseCache>,
    clock: Arc<MutableClock>,
    sleeper: Arc<RecordingSleeper>,
    client: RateLimitedClient,
}

fn harness_with(policy: ClientPolicy) -> Harness {
    let api = Arc::new(ScriptedObservationApi::new());
    let cache = Arc::new(InMemoryResponseCache::default());
    let clock = Arc::new(MutableClock::new(
        Utc.with_ymd_and_hms(2025, 5, 10, 9, 0, 0)
            .single()
            .expect("valid time"),
    ));
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = RateLimitedClient::new(
        ApiClientPorts::new(api.clone(), cache.clone()),
        clock.clone(),
        sleeper.clone(),
        policy,
    );
    Harness {
        api,
        cache,
        clock,
        sleeper,
        client,
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(ClientPolicy {
        min_request_interval: Duration::ZERO,
        ..ClientPolicy::default()
    })
}

fn species_query() -> ApiQuery {
    ApiQuery::new(Endpoint::SpeciesCounts).with_param("project_id", 417)
}

fn count(total: u64) -> Result<Value, ObservationApiError> {
    Ok(json!({ "total_results": total, "results": [] }))
}

#[rstest]
#[tokio::test]
async fn transient_failures_below_the_limit_still_succeed(harness: Harness) {
    harness.api.script(
        &species_query(),
        vec![
            Err(ObservationApiError::rate_limited("status 429")),
            Err(ObservationApiError::server("status 502")),
            count(42),
        ],
    );

    let total = harness.client.total_results(&species_query()).await;

    assert_eq!(total, 42);
    assert_eq!(harness.api.calls().len(), 3);
    assert_eq!(
        harness.sleeper.recorded(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[rstest]
#[tokio::test]
async fn exhausted_retries_collapse_to_zero(harness: Harness) {
    harness.api.script(
        &species_query(),
        vec![
            Err(ObservationApiError::timeout("30s")),
            Err(ObservationApiError::timeout("30s")),
            Err(ObservationApiError::timeout("30s")),
        ],
    );

    let failure = harness
        .client
        .request(&species_query())
        .await
        .expect_err("all attempts fail");
    assert_eq!(failure.attempts, 3);
    assert!(matches!(failure.error, ObservationApiError::Timeout { .. }));

    assert_eq!(harness.client.total_results(&species_query()).await, 0);
}

#[rstest]
#[tokio::test]
async fn missing_total_results_is_retried(harness: Harness) {
    harness.api.script(
        &species_query(),
        vec![Ok(json!({ "error": "busy" })), count(7)],
    );

    assert_eq!(harness.client.total_results(&species_query()).await, 7);
    assert_eq!(harness.api.calls().len(), 2);
}

#[rstest]
#[tokio::test]
async fn rejected_requests_are_not_retried(harness: Harness) {
    harness.api.script(
        &species_query(),
        vec![Err(ObservationApiError::rejected("status 422")), count(1)],
    );

    let failure = harness
        .client
        .request(&species_query())
        .await
        .expect_err("rejection is final");
    assert_eq!(failure.attempts, 1);
    assert!(harness.sleeper.recorded().is_empty());
}

#[rstest]
#[tokio::test]
async fn fresh_cache_hits_skip_network_and_throttle() {
    let harness = harness_with(ClientPolicy::default());
    harness.api.script(&species_query(), vec![count(5), count(6)]);

    assert_eq!(harness.client.total_results(&species_query()).await, 5);
    harness.clock.advance(Duration::from_secs(60));
    assert_eq!(harness.client.total_results(&species_query()).await, 5);

    assert_eq!(harness.api.calls().len(), 1);
    assert!(
        harness.sleeper.recorded().is_empty(),
        "no throttle wait for first call or cache hit"
    );
}

#[rstest]
#[tokio::test]
async fn stale_cache_entries_are_refreshed(harness: Harness) {
    harness.api.script(&species_query(), vec![count(5), count(6)]);

    assert_eq!(harness.client.total_results(&species_query()).await, 5);
    harness.clock.advance(Duration::from_secs(30 * 60));
    assert_eq!(harness.client.total_results(&species_query()).await, 6);

    let stored = harness
        .cache
        .get(&CacheKey::for_query(&species_query()))
        .await
        .expect("cache read")
        .expect("entry stored");
    assert_eq!(stored.body["total_results"], 6);
}

#[rstest]
#[tokio::test]
async fn cache_failures_are_swallowed() {
    let mut cache = MockResponseCache::new();
    cache
        .expect_get()
        .returning(|_| Err(ResponseCacheError::backend("disk unavailable")));
    cache
        .expect_put()
        .times(1)
        .returning(|_, _| Err(ResponseCacheError::serialization("disk full")));

    let api = Arc::new(ScriptedObservationApi::new());
    api.script(&species_query(), vec![count(9)]);
    let client = RateLimitedClient::new(
        ApiClientPorts::new(api, Arc::new(cache)),
        Arc::new(MutableClock::new(Utc::now())),
        Arc::new(RecordingSleeper::default()),
        ClientPolicy {
            min_request_interval: Duration::ZERO,
            ..ClientPolicy::default()
        },
    );

    assert_eq!(client.total_results(&species_query()).await, 9);
}

#[rstest]
#[tokio::test]
async fn successful_responses_are_cached_with_ttl(harness: Harness) {
    harness.api.script(&species_query(), vec![count(3)]);
    harness.client.total_results(&species_query()).await;

    let entry: CachedResponse = harness
        .cache
        .get(&CacheKey::for_query(&species_query()))
        .await
        .expect("cache read")
        .expect("entry stored");
    assert_eq!(
        (entry.expires_at - entry.stored_at).num_minutes(),
        30,
        "default TTL is thirty minutes"
    );
}

#[rstest]
#[tokio::test]
async fn drains_every_page_of_a_listing(harness: Harness) {
    let listing = ApiQuery::new(Endpoint::SpeciesCounts).with_param("project_id", 418);
    for page in 1..=3_u64 {
        let rows = if page == 3 { 234 } else { 500 };
        let results = (0..rows)
            .map(|offset| json!({ "taxon": { "id": (page - 1) * 500 + offset } }))
            .collect::<Vec<_>>();
        harness.api.script(
            &listing
                .clone()
                .with_param("per_page", 500)
                .with_param("page", page),
            vec![Ok(json!({ "total_results": 1234, "results": results }))],
        );
    }

    let rows = harness.client.fetch_all_results(&listing).await;

    assert_eq!(rows.len(), 1234);
    assert_eq!(harness.api.calls().len(), 3);
    let ids = rows
        .iter()
        .filter_map(|row| row["taxon"]["id"].as_u64())
        .collect::<Vec<_>>();
    assert_eq!(ids, (0..1234_u64).collect::<Vec<_>>(), "rows stay in page order");
}

#[rstest]
#[tokio::test]
async fn failed_first_page_yields_an_empty_listing(harness: Harness) {
    let listing = ApiQuery::new(Endpoint::Observers).with_param("project_id", 418);
    harness.api.script(
        &listing
            .clone()
            .with_param("per_page", 500)
            .with_param("page", 1),
        vec![Err(ObservationApiError::rejected("status 404"))],
    );

    assert!(harness.client.fetch_all_results(&listing).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn a_failed_middle_page_leaves_a_hole(harness: Harness) {
    let listing = ApiQuery::new(Endpoint::Observations).with_param("project_id", 418);
    let page = |number: u64| {
        listing
            .clone()
            .with_param("per_page", 200)
            .with_param("page", number)
    };
    for number in [1_u64, 3] {
        harness.api.script(
            &page(number),
            vec![Ok(json!({ "total_results": 600, "results": [{ "id": number }] }))],
        );
    }
    harness
        .api
        .script(&page(2), vec![Err(ObservationApiError::rejected("status 404"))]);

    let per_page = std::num::NonZeroU32::new(200).expect("non-zero");
    let fetched = harness.client.fetch_listing(&listing, per_page).await;

    assert!(!fetched.is_complete());
    assert_eq!(fetched.clone().into_rows(), vec![json!({ "id": 1 }), json!({ "id": 3 })]);
    assert_eq!(fetched.into_leading_rows(), vec![json!({ "id": 1 })]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn concurrent_listings_share_the_in_flight_limit() {
    let api = Arc::new(SlowObservationApi::new(Duration::from_millis(20)));
    let client = immediate_client(api.clone());
    let observers = ApiQuery::new(Endpoint::Observers).with_param("project_id", 418);
    let identifiers = observers.retarget(Endpoint::Identifiers);

    let (first, second) = futures_util::join!(
        client.fetch_all_results(&observers),
        client.fetch_all_results(&identifiers),
    );

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert!(api.peak() <= ClientPolicy::default().max_in_flight, "peak {}", api.peak());
}
