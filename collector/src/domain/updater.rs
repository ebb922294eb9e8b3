//! Campaign orchestration: refresh every table a campaign publishes.
//!
//! Each table is its own step. A step that fails is recorded in the
//! [`CampaignReport`] and the run moves on; nothing short of a configuration
//! error stops a campaign. Tables identical to what is already stored are not
//! rewritten, so a rerun without upstream changes leaves every file untouched.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use table_store::{Table, TableError};
use tracing::{info, warn};

use super::api_client::RateLimitedClient;
use super::campaign::{Campaign, CounterConfig, ProjectTables};
use super::error::Error;
use super::metrics::{MetricScope, MetricsAggregator, SeriesSchedule};
use super::observations::ObservationSync;
use super::participation::ParticipationAggregator;
use super::runtime::Sleeper;
use super::tables::{self, PlaceSnapshot};
use super::taxonomy::{RollupOutcome, TaxonomicClassifier, rollup_environments};
use crate::domain::ports::{
    DatasetRepository, DatasetRepositoryError, TableLocation, TaxonomyReference,
    TaxonomyReferenceError,
};

/// Result of refreshing one table.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The table changed and was replaced.
    Written,
    /// The freshly built table matched the stored one.
    Unchanged,
    /// No table could be produced; the stored one is left as is.
    Skipped {
        /// Why the step produced nothing.
        reason: String,
    },
    /// Building or persisting the table failed.
    Failed {
        /// What went wrong.
        error: Error,
    },
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written => f.write_str("written"),
            Self::Unchanged => f.write_str("unchanged"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Outcome for one table location.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Table the step targets.
    pub table: TableLocation,
    /// What happened.
    pub outcome: StepOutcome,
}

/// Step outcomes of one campaign (or of the counter pass).
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignReport {
    /// Campaign name.
    pub campaign: String,
    /// Steps in execution order.
    pub steps: Vec<StepReport>,
}

impl CampaignReport {
    /// Start an empty report.
    pub fn new(campaign: impl Into<String>) -> Self {
        Self {
            campaign: campaign.into(),
            steps: Vec::new(),
        }
    }

    fn record(&mut self, table: TableLocation, outcome: StepOutcome) {
        self.steps.push(StepReport { table, outcome });
    }

    /// Outcome recorded for `table`, if the step ran.
    pub fn outcome(&self, table: &TableLocation) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|step| &step.table == table)
            .map(|step| &step.outcome)
    }

    /// Number of steps that wrote a table.
    pub fn written(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Written))
    }

    /// Number of failed steps.
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps
            .iter()
            .filter(|step| predicate(&step.outcome))
            .count()
    }

    /// Emit one event per noteworthy step and a summary line.
    pub fn log(&self) {
        for step in &self.steps {
            match &step.outcome {
                StepOutcome::Failed { error } => {
                    warn!(campaign = %self.campaign, table = %step.table, error = %error, "table step failed");
                }
                StepOutcome::Skipped { reason } => {
                    info!(campaign = %self.campaign, table = %step.table, reason = %reason, "table step skipped");
                }
                StepOutcome::Written | StepOutcome::Unchanged => {}
            }
        }
        info!(
            campaign = %self.campaign,
            steps = self.steps.len(),
            written = self.written(),
            failed = self.failed(),
            "campaign update finished"
        );
    }
}

/// Driven ports the updater needs.
#[derive(Clone)]
pub struct UpdaterPorts {
    /// Shared rate-limited client.
    pub client: Arc<RateLimitedClient>,
    /// Persisted tables.
    pub datasets: Arc<dyn DatasetRepository>,
    /// Marine/terrestrial reference.
    pub taxonomy: Arc<dyn TaxonomyReference>,
    /// Sleeper for batch pauses.
    pub sleeper: Arc<dyn Sleeper>,
}

impl UpdaterPorts {
    /// Bundle the updater's ports.
    pub fn new(
        client: Arc<RateLimitedClient>,
        datasets: Arc<dyn DatasetRepository>,
        taxonomy: Arc<dyn TaxonomyReference>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            client,
            datasets,
            taxonomy,
            sleeper,
        }
    }
}

fn map_table_error(error: TableError) -> Error {
    Error::internal(format!("failed to build table: {error}"))
}

fn map_dataset_error(error: DatasetRepositoryError) -> Error {
    Error::unavailable(error.to_string())
}

fn map_taxonomy_error(error: &TaxonomyReferenceError) -> Error {
    Error::unavailable(format!("taxonomy reference unavailable: {error}"))
}

/// Refreshes campaign and counter tables.
pub struct DatasetUpdater {
    metrics: MetricsAggregator,
    participation: ParticipationAggregator,
    classifier: TaxonomicClassifier,
    observations: ObservationSync,
    datasets: Arc<dyn DatasetRepository>,
}

impl DatasetUpdater {
    /// Wire the aggregators over `ports`.
    pub fn new(ports: UpdaterPorts, schedule: SeriesSchedule) -> Self {
        let UpdaterPorts {
            client,
            datasets,
            taxonomy,
            sleeper,
        } = ports;
        Self {
            metrics: MetricsAggregator::new(client.clone(), sleeper, schedule),
            participation: ParticipationAggregator::new(client.clone()),
            classifier: TaxonomicClassifier::new(client.clone(), taxonomy),
            observations: ObservationSync::new(client),
            datasets,
        }
    }

    /// Refresh every table of `campaign` as of `today`.
    pub async fn update_campaign(&self, campaign: &Campaign, today: NaiveDate) -> CampaignReport {
        info!(campaign = %campaign.name, %today, "updating campaign");
        let mut report = CampaignReport::new(campaign.name.clone());

        let main = MetricScope::Project(campaign.main_project);
        let range = campaign.day_range(today);
        let outcome = if range.is_empty() {
            StepOutcome::Skipped {
                reason: format!("no elapsed days since {}", campaign.start_date),
            }
        } else {
            let series = self.metrics.daily_series(&main, &range).await;
            self.persist(&campaign.daily_series_table(), tables::daily_series_table(&series))
                .await
        };
        report.record(campaign.daily_series_table(), outcome);

        let outcome = if campaign.city_projects.is_empty() {
            StepOutcome::Skipped {
                reason: "campaign has no city projects".to_owned(),
            }
        } else {
            let mut places = Vec::with_capacity(campaign.city_projects.len());
            for (project_id, city) in &campaign.city_projects {
                let snapshot = self
                    .metrics
                    .snapshot(&MetricScope::Project(*project_id), &[])
                    .await;
                places.push(PlaceSnapshot {
                    project_id: *project_id,
                    city: city.clone(),
                    snapshot,
                });
            }
            self.persist(
                &campaign.place_snapshot_table(),
                tables::place_snapshot_table(&places),
            )
            .await
        };
        report.record(campaign.place_snapshot_table(), outcome);

        for project_id in &campaign.observation_projects {
            self.update_project(campaign, *project_id, today, &mut report)
                .await;
        }

        let totals = self.metrics.snapshot(&main, &[]).await;
        let outcome = self
            .persist(&campaign.totals_table(), tables::totals_table(&totals))
            .await;
        report.record(campaign.totals_table(), outcome);

        report
    }

    async fn update_project(
        &self,
        campaign: &Campaign,
        project_id: u64,
        today: NaiveDate,
        report: &mut CampaignReport,
    ) {
        let ProjectTables {
            observations,
            photos,
            species,
            participation,
            rollup,
        } = campaign.project_tables(project_id);

        let dump = match self.read_pair(&observations, &photos).await {
            Ok((stored_observations, stored_photos)) => {
                let previous =
                    tables::dump_from_tables(stored_observations.as_ref(), stored_photos.as_ref());
                let updated_since = today.pred_opt().unwrap_or(today);
                let dump = self
                    .observations
                    .refresh(project_id, &campaign.grade_filter(), previous, updated_since)
                    .await;
                let outcome = self
                    .persist(&observations, tables::observations_table(&dump.observations))
                    .await;
                report.record(observations, outcome);
                let outcome = self
                    .persist(&photos, tables::photos_table(&dump.photos))
                    .await;
                report.record(photos, outcome);
                Some(dump)
            }
            Err(error) => {
                warn!(project_id, error = %error, "stored observation dump unreadable");
                report.record(
                    observations,
                    StepOutcome::Failed {
                        error: error.clone(),
                    },
                );
                report.record(photos, StepOutcome::Failed { error });
                None
            }
        };

        match self.classifier.classified_species(project_id).await {
            Ok(classified) => {
                let outcome = self
                    .persist(&species, tables::species_table(&classified))
                    .await;
                report.record(species, outcome);
                let outcome = match dump {
                    Some(dump) => match rollup_environments(&dump.observations, &classified) {
                        RollupOutcome::Computed(rows) => {
                            self.persist(&rollup, tables::rollup_table(&rows)).await
                        }
                        RollupOutcome::Skipped { reason } => StepOutcome::Skipped { reason },
                    },
                    None => StepOutcome::Skipped {
                        reason: "observation dump unavailable".to_owned(),
                    },
                };
                report.record(rollup, outcome);
            }
            Err(error) => {
                let error = map_taxonomy_error(&error);
                report.record(
                    species,
                    StepOutcome::Failed {
                        error: error.clone(),
                    },
                );
                report.record(rollup, StepOutcome::Failed { error });
            }
        }

        let rows = self
            .participation
            .participation(
                project_id,
                campaign.quality_grade.as_deref(),
                &campaign.denylist,
            )
            .await;
        let outcome = self
            .persist(&participation, tables::participation_table(&rows))
            .await;
        report.record(participation, outcome);
    }

    /// Refresh every counter, writing only counters whose observation total moved.
    pub async fn update_counters(&self, counters: &[CounterConfig]) -> CampaignReport {
        let mut report = CampaignReport::new("counters");
        for counter in counters {
            let location = counter.location();
            let outcome = self.update_counter(counter, &location).await;
            report.record(location, outcome);
        }
        report
    }

    async fn update_counter(&self, counter: &CounterConfig, location: &TableLocation) -> StepOutcome {
        let totals = self
            .metrics
            .snapshot(&MetricScope::Projects(counter.project_ids.clone()), &[])
            .await;
        match self.datasets.read_table(location).await {
            Ok(Some(stored))
                if tables::counter_observations(&stored) == Some(totals.observations) =>
            {
                info!(counter = %counter.name, observations = totals.observations, "counter unchanged");
                return StepOutcome::Unchanged;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(counter = %counter.name, error = %error, "stored counter unreadable, rewriting");
            }
        }
        let table = match tables::counter_table(&totals) {
            Ok(table) => table,
            Err(error) => return StepOutcome::Failed {
                error: map_table_error(error),
            },
        };
        self.write(location, &table).await
    }

    async fn read_pair(
        &self,
        first: &TableLocation,
        second: &TableLocation,
    ) -> Result<(Option<Table>, Option<Table>), Error> {
        let (first, second) = futures_util::join!(
            self.datasets.read_table(first),
            self.datasets.read_table(second),
        );
        Ok((
            first.map_err(map_dataset_error)?,
            second.map_err(map_dataset_error)?,
        ))
    }

    async fn persist(&self, location: &TableLocation, built: Result<Table, TableError>) -> StepOutcome {
        let table = match built {
            Ok(table) => table,
            Err(error) => {
                return StepOutcome::Failed {
                    error: map_table_error(error),
                };
            }
        };
        match self.datasets.read_table(location).await {
            Ok(Some(stored)) if stored == table => return StepOutcome::Unchanged,
            Ok(_) => {}
            Err(error) => {
                warn!(table = %location, error = %error, "stored table unreadable, rewriting");
            }
        }
        self.write(location, &table).await
    }

    async fn write(&self, location: &TableLocation, table: &Table) -> StepOutcome {
        match self.datasets.write_table(location, table).await {
            Ok(()) => {
                info!(table = %location, rows = table.len(), "table written");
                StepOutcome::Written
            }
            Err(error) => StepOutcome::Failed {
                error: map_dataset_error(error),
            },
        }
    }
}

#[cfg(test)]
mod tests;
