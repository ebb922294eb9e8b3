//! Observation, species and participant counts for projects and places.
//!
//! A snapshot is three independent counting queries sharing one filter set.
//! The daily series re-runs a snapshot per day with a `created_d2` cutoff,
//! giving cumulative counts as of each day.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::{StreamExt, stream};
use tracing::{debug, info};

use super::api_client::RateLimitedClient;
use super::runtime::Sleeper;
use crate::domain::ports::{ApiQuery, Endpoint};

/// What a metric query counts over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricScope {
    /// One project.
    Project(u64),
    /// Several projects counted together (comma-joined `project_id`).
    Projects(Vec<u64>),
    /// One place.
    Place(u64),
}

impl MetricScope {
    fn apply(&self, query: ApiQuery) -> ApiQuery {
        match self {
            Self::Project(id) => query.with_param("project_id", id),
            Self::Projects(ids) => query.with_param(
                "project_id",
                ids.iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Self::Place(id) => query.with_param("place_id", id),
        }
    }
}

/// Point-in-time totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricSnapshot {
    /// Observation count.
    pub observations: u64,
    /// Distinct species count.
    pub species: u64,
    /// Distinct observer count.
    pub participants: u64,
}

/// Cumulative totals as of the end of `date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyMetric {
    /// Cutoff day.
    pub date: NaiveDate,
    /// Totals for observations created on or before `date`.
    pub snapshot: MetricSnapshot,
}

/// Contiguous run of days, possibly empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    first: NaiveDate,
    last: Option<NaiveDate>,
}

impl DayRange {
    /// Days from `start` through the day before `today`, capped by `end`.
    ///
    /// The range is empty when `start` is today or later.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use collector::domain::DayRange;
    ///
    /// let day = |d| NaiveDate::from_ymd_opt(2025, 5, d).expect("valid date");
    /// let range = DayRange::through_yesterday(day(3), None, day(6));
    /// assert_eq!(range.days().collect::<Vec<_>>(), vec![day(3), day(4), day(5)]);
    /// assert!(DayRange::through_yesterday(day(6), None, day(6)).is_empty());
    /// ```
    pub fn through_yesterday(start: NaiveDate, end: Option<NaiveDate>, today: NaiveDate) -> Self {
        let yesterday = today.pred_opt();
        let last = match (yesterday, end) {
            (Some(yesterday), Some(end)) => Some(yesterday.min(end)),
            (yesterday, None) => yesterday,
            (None, Some(_)) => None,
        }
        .filter(|last| *last >= start);
        Self { first: start, last }
    }

    /// Whether the range has no days.
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Number of days in the range.
    pub fn len(&self) -> usize {
        self.days().count()
    }

    /// Days in ascending order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let first = self.first;
        let last = self.last;
        first
            .iter_days()
            .take_while(move |day| last.is_some_and(|last| *day <= last))
    }
}

/// Batching limits for the daily series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSchedule {
    /// Days per batch.
    pub batch_size: usize,
    /// Days computed concurrently within a batch.
    pub max_in_flight: usize,
    /// Pause between consecutive batches.
    pub batch_pause: Duration,
}

impl Default for SeriesSchedule {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_in_flight: 3,
            batch_pause: Duration::from_millis(500),
        }
    }
}

/// Computes snapshots and daily series through the rate-limited client.
pub struct MetricsAggregator {
    client: Arc<RateLimitedClient>,
    sleeper: Arc<dyn Sleeper>,
    schedule: SeriesSchedule,
}

impl MetricsAggregator {
    /// Build an aggregator sharing `client`.
    pub fn new(
        client: Arc<RateLimitedClient>,
        sleeper: Arc<dyn Sleeper>,
        schedule: SeriesSchedule,
    ) -> Self {
        Self {
            client,
            sleeper,
            schedule,
        }
    }

    /// Count observations, species and observers for `scope`.
    ///
    /// Each count that cannot be fetched is reported as zero.
    pub async fn snapshot(&self, scope: &MetricScope, filters: &[(String, String)]) -> MetricSnapshot {
        let base = scope
            .apply(ApiQuery::new(Endpoint::Observations))
            .with_filters(filters);
        let species_query = base.retarget(Endpoint::SpeciesCounts);
        let observers_query = base.retarget(Endpoint::Observers);

        let (observations, species, participants) = futures_util::join!(
            self.client.total_results(&base),
            self.client.total_results(&species_query),
            self.client.total_results(&observers_query),
        );
        MetricSnapshot {
            observations,
            species,
            participants,
        }
    }

    /// Cumulative totals for each day of `range`, sorted by date.
    ///
    /// Days are processed in batches of bounded parallelism with a pause
    /// between batches. An empty range yields an empty series.
    pub async fn daily_series(&self, scope: &MetricScope, range: &DayRange) -> Vec<DailyMetric> {
        let days = range.days().collect::<Vec<_>>();
        if days.is_empty() {
            debug!(?scope, "daily series range is empty");
            return Vec::new();
        }

        let batch_size = self.schedule.batch_size.max(1);
        let batch_count = days.len().div_ceil(batch_size);
        let mut series = Vec::with_capacity(days.len());

        for (index, batch) in days.chunks(batch_size).enumerate() {
            info!(
                ?scope,
                batch = index + 1,
                batches = batch_count,
                "computing daily metrics batch"
            );
            let mut results = stream::iter(batch.iter().copied())
                .map(|day| self.day_metric(scope, day))
                .buffer_unordered(self.schedule.max_in_flight.max(1))
                .collect::<Vec<_>>()
                .await;
            results.sort_by_key(|metric| metric.date);
            series.extend(results);

            if index + 1 < batch_count {
                self.sleeper.sleep(self.schedule.batch_pause).await;
            }
        }

        series.sort_by_key(|metric| metric.date);
        series
    }

    async fn day_metric(&self, scope: &MetricScope, day: NaiveDate) -> DailyMetric {
        let filters = [
            ("created_d2".to_owned(), day.format("%Y-%m-%d").to_string()),
            ("order".to_owned(), "desc".to_owned()),
            ("order_by".to_owned(), "created_at".to_owned()),
        ];
        DailyMetric {
            date: day,
            snapshot: self.snapshot(scope, &filters).await,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Snapshot and daily series behaviour against a scripted API.

    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::domain::api_client::{ApiClientPorts, ClientPolicy};
    use crate::domain::ports::ObservationApiError;
    use crate::test_support::api::{ScriptedObservationApi, SlowObservationApi, immediate_client};
    use crate::test_support::clock::{ImmediateSleeper, MutableClock, RecordingSleeper};
    use crate::test_support::stores::InMemoryResponseCache;

    fn day(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).expect("valid date")
    }

    fn aggregator(api: Arc<ScriptedObservationApi>, sleeper: Arc<RecordingSleeper>) -> MetricsAggregator {
        let clock = Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2025, 5, 20, 6, 0, 0)
                .single()
                .expect("valid time"),
        ));
        let client = RateLimitedClient::new(
            ApiClientPorts::new(api, Arc::new(InMemoryResponseCache::default())),
            clock,
            Arc::new(RecordingSleeper::default()),
            ClientPolicy {
                min_request_interval: Duration::ZERO,
                ..ClientPolicy::default()
            },
        );
        MetricsAggregator::new(Arc::new(client), sleeper, SeriesSchedule::default())
    }

    /// Scripted API whose totals encode the endpoint and cutoff day.
    fn day_encoding_api() -> Arc<ScriptedObservationApi> {
        Arc::new(ScriptedObservationApi::with_fallback(|query| {
            let day_of_month = query
                .param("created_d2")
                .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
                .map_or(0, |date| u64::from(chrono::Datelike::day(&date)));
            let factor = match query.endpoint() {
                Endpoint::Observations => 100,
                Endpoint::SpeciesCounts => 10,
                _ => 1,
            };
            Ok(json!({ "total_results": day_of_month * factor }))
        }))
    }

    #[rstest]
    #[case::future_start(day(5, 25), None, day(5, 20), 0)]
    #[case::start_today(day(5, 20), None, day(5, 20), 0)]
    #[case::start_yesterday(day(5, 19), None, day(5, 20), 1)]
    #[case::campaign_under_way(day(5, 3), None, day(5, 20), 17)]
    #[case::capped_by_end(day(5, 3), Some(day(5, 10)), day(5, 20), 8)]
    #[case::end_before_start(day(5, 3), Some(day(5, 1)), day(5, 20), 0)]
    fn day_ranges_stop_before_today(
        #[case] start: NaiveDate,
        #[case] end: Option<NaiveDate>,
        #[case] today: NaiveDate,
        #[case] expected: usize,
    ) {
        let range = DayRange::through_yesterday(start, end, today);
        assert_eq!(range.len(), expected);
        assert_eq!(range.is_empty(), expected == 0);
        assert!(range.days().all(|d| d >= start && d < today));
    }

    #[rstest]
    #[tokio::test]
    async fn snapshot_combines_three_counts() {
        let api = Arc::new(ScriptedObservationApi::with_fallback(|query| {
            let total = match query.endpoint() {
                Endpoint::Observations => 120,
                Endpoint::SpeciesCounts => 45,
                Endpoint::Observers => 12,
                Endpoint::Identifiers => 0,
            };
            Ok(json!({ "total_results": total }))
        }));
        let metrics = aggregator(api.clone(), Arc::new(RecordingSleeper::default()));

        let snapshot = metrics.snapshot(&MetricScope::Project(418), &[]).await;

        assert_eq!(
            snapshot,
            MetricSnapshot {
                observations: 120,
                species: 45,
                participants: 12,
            }
        );
        assert!(
            api.calls()
                .iter()
                .all(|query| query.param("project_id") == Some("418"))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn grouped_projects_are_comma_joined() {
        let api = Arc::new(ScriptedObservationApi::new());
        let metrics = aggregator(api.clone(), Arc::new(RecordingSleeper::default()));

        metrics
            .snapshot(&MetricScope::Projects(vec![417, 418, 420]), &[])
            .await;

        assert!(
            api.calls()
                .iter()
                .all(|query| query.param("project_id") == Some("417,418,420"))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn failed_counts_default_to_zero() {
        let api = Arc::new(ScriptedObservationApi::with_fallback(|query| {
            if query.endpoint() == Endpoint::SpeciesCounts {
                Err(ObservationApiError::rejected("status 400"))
            } else {
                Ok(json!({ "total_results": 8 }))
            }
        }));
        let metrics = aggregator(api, Arc::new(RecordingSleeper::default()));

        let snapshot = metrics.snapshot(&MetricScope::Place(5), &[]).await;
        assert_eq!(snapshot.species, 0);
        assert_eq!(snapshot.observations, 8);
    }

    #[rstest]
    #[tokio::test]
    async fn daily_series_is_contiguous_and_sorted() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let metrics = aggregator(day_encoding_api(), sleeper.clone());
        let range = DayRange::through_yesterday(day(5, 3), None, day(5, 15));

        let series = metrics.daily_series(&MetricScope::Project(417), &range).await;

        let dates = series.iter().map(|metric| metric.date).collect::<Vec<_>>();
        assert_eq!(dates, range.days().collect::<Vec<_>>());
        for metric in &series {
            let dom = u64::from(chrono::Datelike::day(&metric.date));
            assert_eq!(metric.snapshot.observations, dom * 100);
            assert_eq!(metric.snapshot.species, dom * 10);
            assert_eq!(metric.snapshot.participants, dom);
        }
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(500); 2],
            "12 days in batches of 5 pause twice"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn daily_series_keeps_failed_days_as_zero() {
        let api = Arc::new(ScriptedObservationApi::with_fallback(|query| {
            if query.param("created_d2") == Some("2025-05-04") {
                Err(ObservationApiError::rejected("status 400"))
            } else {
                Ok(json!({ "total_results": 3 }))
            }
        }));
        let metrics = aggregator(api, Arc::new(RecordingSleeper::default()));
        let range = DayRange::through_yesterday(day(5, 3), None, day(5, 6));

        let series = metrics.daily_series(&MetricScope::Project(417), &range).await;

        assert_eq!(series.len(), 3);
        assert_eq!(series[1].date, day(5, 4));
        assert_eq!(series[1].snapshot, MetricSnapshot::default());
        assert_eq!(series[2].snapshot.observations, 3);
    }

    #[rstest]
    #[tokio::test]
    async fn empty_range_issues_no_requests() {
        let api = Arc::new(ScriptedObservationApi::new());
        let metrics = aggregator(api.clone(), Arc::new(RecordingSleeper::default()));
        let range = DayRange::through_yesterday(day(6, 1), None, day(5, 20));

        assert!(metrics.daily_series(&MetricScope::Project(417), &range).await.is_empty());
        assert!(api.calls().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn daily_series_keeps_requests_within_the_in_flight_limit() {
        let api = Arc::new(SlowObservationApi::new(Duration::from_millis(50)));
        let aggregator = MetricsAggregator::new(
            immediate_client(api.clone()),
            Arc::new(ImmediateSleeper),
            SeriesSchedule::default(),
        );

        let range = DayRange::through_yesterday(day(5, 1), None, day(5, 6));
        let series = aggregator.daily_series(&MetricScope::Project(417), &range).await;

        assert_eq!(series.len(), 5);
        assert_eq!(api.calls(), 15);
        assert_eq!(api.peak(), ClientPolicy::default().max_in_flight);
    }
}
