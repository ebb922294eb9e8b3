//! Orchestration tests over scripted upstream data and in-memory tables.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::{CampaignReport, DatasetUpdater, StepOutcome, UpdaterPorts};
use crate::domain::ports::{
    ApiQuery, DatasetRepositoryError, Endpoint, MockDatasetRepository, ObservationApiError,
    TableLocation,
};
use crate::domain::{Campaign, CounterConfig, Denylist, SeriesSchedule};
use crate::test_support::api::{ScriptedObservationApi, immediate_client};
use crate::test_support::clock::ImmediateSleeper;
use crate::test_support::stores::{InMemoryDatasetRepository, StaticTaxonomyReference};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, d).expect("valid date")
}

fn observation_json(id: u64, taxon_id: u64, name: &str) -> Value {
    json!({
        "id": id,
        "created_at": "2025-05-02T09:00:00+02:00",
        "updated_at": "2025-05-02T09:00:00+02:00",
        "observed_on": "2025-05-02",
        "taxon": { "id": taxon_id, "name": name, "rank": "species" },
        "user": { "id": 12, "login": "diver" },
        "quality_grade": "research",
        "location": "41.38,2.19",
        "photos": [{ "id": id * 10, "url": format!("https://static.example.org/{id}.jpg"), "license_code": "cc-by" }]
    })
}

fn upstream(query: &ApiQuery) -> Result<Value, ObservationApiError> {
    let listing = |rows: Vec<Value>| {
        json!({ "total_results": rows.len(), "results": rows })
    };
    Ok(match query.endpoint() {
        Endpoint::Observations => {
            let above = query
                .param("id_above")
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0);
            let rows = [
                observation_json(101, 10, "Octopus vulgaris"),
                observation_json(102, 20, "Pinus pinea"),
            ]
            .into_iter()
            .filter(|row| row["id"].as_u64().is_some_and(|id| id > above))
            .collect();
            listing(rows)
        }
        Endpoint::SpeciesCounts => listing(vec![
            json!({ "taxon": { "id": 10, "name": "Octopus vulgaris", "rank": "species", "ancestry": "48460/1" } }),
            json!({ "taxon": { "id": 20, "name": "Pinus pinea", "rank": "species", "ancestry": "48460/2" } }),
        ]),
        Endpoint::Observers => listing(vec![
            json!({ "user_id": 12, "user": { "login": "diver" }, "observation_count": 2, "species_count": 2 }),
            json!({ "user_id": 13, "user": { "login": "bot" }, "observation_count": 90, "species_count": 1 }),
        ]),
        Endpoint::Identifiers => listing(vec![json!({ "user_id": 12, "count": 3 })]),
    })
}

fn campaign() -> Campaign {
    Campaign {
        name: "biomarato-2025".to_owned(),
        main_project: 417,
        city_projects: BTreeMap::from([(418, "Barcelona".to_owned())]),
        observation_projects: vec![418],
        start_date: day(1),
        end_date: None,
        quality_grade: None,
        denylist: ["bot"].into_iter().collect::<Denylist>(),
        output_dir: "biomarato".to_owned(),
    }
}

struct Harness {
    datasets: Arc<InMemoryDatasetRepository>,
    updater: DatasetUpdater,
}

fn harness_with(flags: &[(u64, bool)]) -> Harness {
    let datasets = Arc::new(InMemoryDatasetRepository::default());
    let updater = DatasetUpdater::new(
        UpdaterPorts::new(
            immediate_client(Arc::new(ScriptedObservationApi::with_fallback(upstream))),
            datasets.clone(),
            Arc::new(StaticTaxonomyReference::new(flags.iter().copied())),
            Arc::new(ImmediateSleeper),
        ),
        SeriesSchedule::default(),
    );
    Harness { datasets, updater }
}

#[fixture]
fn harness() -> Harness {
    harness_with(&[(10, true), (20, false)])
}

fn outcome<'a>(report: &'a CampaignReport, location: &TableLocation) -> &'a StepOutcome {
    report.outcome(location).expect("step recorded")
}

#[rstest]
#[tokio::test]
async fn first_run_writes_every_table(harness: Harness) {
    let campaign = campaign();
    let report = harness.updater.update_campaign(&campaign, day(4)).await;

    assert_eq!(report.failed(), 0, "{report:?}");
    assert_eq!(report.written(), 8);

    let series = harness
        .datasets
        .table(&campaign.daily_series_table())
        .expect("series stored");
    assert_eq!(series.column_values("date").collect::<Vec<_>>(), ["2025-05-01", "2025-05-02", "2025-05-03"]);

    let tables = campaign.project_tables(418);
    let rollup = harness.datasets.table(&tables.rollup).expect("rollup stored");
    assert_eq!(
        rollup.rows(),
        [
            vec!["terrestrial".to_owned(), "1".to_owned(), "1".to_owned()],
            vec!["marine".to_owned(), "1".to_owned(), "1".to_owned()],
        ]
    );

    let users = harness
        .datasets
        .table(&tables.participation)
        .expect("participation stored");
    assert_eq!(users.rows(), [vec!["diver", "2", "2", "3"]]);

    let obs = harness.datasets.table(&tables.observations).expect("dump stored");
    assert_eq!(obs.column_values("id").collect::<Vec<_>>(), ["102", "101"]);
}

#[rstest]
#[tokio::test]
async fn rerun_without_upstream_changes_writes_nothing(harness: Harness) {
    let campaign = campaign();
    harness.updater.update_campaign(&campaign, day(4)).await;
    let writes_after_first = harness.datasets.writes().len();

    let report = harness.updater.update_campaign(&campaign, day(4)).await;

    assert_eq!(harness.datasets.writes().len(), writes_after_first);
    assert!(
        report
            .steps
            .iter()
            .all(|step| step.outcome == StepOutcome::Unchanged),
        "{report:?}"
    );
}

#[rstest]
#[tokio::test]
async fn series_is_skipped_when_no_day_has_elapsed(harness: Harness) {
    let campaign = campaign();
    let report = harness.updater.update_campaign(&campaign, day(1)).await;

    assert!(matches!(
        outcome(&report, &campaign.daily_series_table()),
        StepOutcome::Skipped { .. }
    ));
    assert!(harness.datasets.table(&campaign.daily_series_table()).is_none());
    assert!(harness.datasets.table(&campaign.totals_table()).is_some());
}

#[rstest]
#[tokio::test]
async fn rollup_is_skipped_when_one_environment_is_missing() {
    let harness = harness_with(&[(10, true)]);
    let campaign = campaign();
    let tables = campaign.project_tables(418);

    let report = harness.updater.update_campaign(&campaign, day(4)).await;

    assert!(matches!(outcome(&report, &tables.rollup), StepOutcome::Skipped { .. }));
    assert_eq!(outcome(&report, &tables.species), &StepOutcome::Written);
    let species = harness.datasets.table(&tables.species).expect("species stored");
    assert_eq!(species.column_values("marine").collect::<Vec<_>>(), ["true", ""]);
}

#[rstest]
#[tokio::test]
async fn write_failures_are_recorded_per_table() {
    let mut datasets = MockDatasetRepository::new();
    datasets.expect_read_table().returning(|_| Ok(None));
    datasets
        .expect_write_table()
        .returning(|_, _| Err(DatasetRepositoryError::io("read-only filesystem")));
    let updater = DatasetUpdater::new(
        UpdaterPorts::new(
            immediate_client(Arc::new(ScriptedObservationApi::with_fallback(upstream))),
            Arc::new(datasets),
            Arc::new(StaticTaxonomyReference::new([(10, true), (20, false)])),
            Arc::new(ImmediateSleeper),
        ),
        SeriesSchedule::default(),
    );

    let report = updater.update_campaign(&campaign(), day(4)).await;

    assert_eq!(report.steps.len(), 8);
    assert_eq!(report.failed(), 8);
}

#[rstest]
#[tokio::test]
async fn counters_are_rewritten_only_when_observations_move() {
    let observations = Arc::new(AtomicU64::new(40));
    let upstream_total = observations.clone();
    let api = ScriptedObservationApi::with_fallback(move |query| {
        let total = match query.endpoint() {
            Endpoint::Observations => upstream_total.load(Ordering::SeqCst),
            _ => 7,
        };
        Ok(json!({ "total_results": total, "results": [] }))
    });
    let datasets = Arc::new(InMemoryDatasetRepository::default());
    let updater = DatasetUpdater::new(
        UpdaterPorts::new(
            immediate_client(Arc::new(api)),
            datasets.clone(),
            Arc::new(StaticTaxonomyReference::default()),
            Arc::new(ImmediateSleeper),
        ),
        SeriesSchedule::default(),
    );
    let counters = [CounterConfig {
        name: "all-campaigns".to_owned(),
        project_ids: vec![417, 500],
        output: "global/counter.csv".to_owned(),
    }];
    let location = counters[0].location();

    let first = updater.update_counters(&counters).await;
    let second = updater.update_counters(&counters).await;
    observations.store(41, Ordering::SeqCst);
    let third = updater.update_counters(&counters).await;

    assert_eq!(outcome(&first, &location), &StepOutcome::Written);
    assert_eq!(outcome(&second, &location), &StepOutcome::Unchanged);
    assert_eq!(outcome(&third, &location), &StepOutcome::Written);
    let stored = datasets.table(&location).expect("counter stored");
    assert_eq!(stored.rows(), [vec!["41", "7", "7"]]);
}
