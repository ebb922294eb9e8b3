//! Campaign and counter configuration records.
//!
//! A campaign bundles the projects one output directory is built from. Table
//! file names are derived from project identifiers so reruns address the
//! same files.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::metrics::DayRange;
use super::observations::GradeFilter;
use super::participation::Denylist;
use crate::domain::ports::TableLocation;

/// One campaign's projects, dates and output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    /// Unique campaign name.
    pub name: String,
    /// Umbrella project for the daily series and totals.
    pub main_project: u64,
    /// Per-place projects, keyed by project identifier, with display names.
    pub city_projects: BTreeMap<u64, String>,
    /// Projects whose observations are dumped and classified.
    pub observation_projects: Vec<u64>,
    /// First day of the daily series.
    pub start_date: NaiveDate,
    /// Optional last day of the daily series.
    pub end_date: Option<NaiveDate>,
    /// Restrict dumps and participation to this quality grade.
    pub quality_grade: Option<String>,
    /// Logins excluded from participation tables.
    pub denylist: Denylist,
    /// Dataset the campaign's tables are written to.
    pub output_dir: String,
}

impl Campaign {
    /// Days covered by the daily series when run on `today`.
    pub fn day_range(&self, today: NaiveDate) -> DayRange {
        DayRange::through_yesterday(self.start_date, self.end_date, today)
    }

    /// Grade filter for observation dumps.
    pub fn grade_filter(&self) -> GradeFilter {
        GradeFilter::for_campaign(self.quality_grade.as_deref())
    }

    fn table(&self, file_name: String) -> TableLocation {
        TableLocation::new(self.output_dir.clone(), file_name)
    }

    /// Daily series table.
    pub fn daily_series_table(&self) -> TableLocation {
        self.table(format!("{}_main_metrics_per_day.csv", self.main_project))
    }

    /// Per-place snapshot table.
    pub fn place_snapshot_table(&self) -> TableLocation {
        self.table(format!("{}_main_metrics_projects.csv", self.main_project))
    }

    /// Realtime totals table.
    pub fn totals_table(&self) -> TableLocation {
        self.table(format!("{}_metrics_realtime.csv", self.main_project))
    }

    /// Tables written for one observation project.
    pub fn project_tables(&self, project_id: u64) -> ProjectTables {
        ProjectTables {
            observations: self.table(format!("{project_id}_obs.csv")),
            photos: self.table(format!("{project_id}_photos.csv")),
            species: self.table(format!("{project_id}_species.csv")),
            participation: self.table(format!("{project_id}_users.csv")),
            rollup: self.table(format!("{project_id}_marines.csv")),
        }
    }
}

/// Table locations for one observation project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTables {
    /// Observation dump.
    pub observations: TableLocation,
    /// Photo dump.
    pub photos: TableLocation,
    /// Classified species.
    pub species: TableLocation,
    /// Participation.
    pub participation: TableLocation,
    /// Marine/terrestrial rollup.
    pub rollup: TableLocation,
}

/// A global counter over several projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    /// Unique counter name.
    pub name: String,
    /// Projects counted together.
    pub project_ids: Vec<u64>,
    /// Relative output path, `dir/file.csv` or a bare file name.
    pub output: String,
}

impl CounterConfig {
    /// Where the counter table lives.
    ///
    /// ```
    /// use collector::domain::CounterConfig;
    ///
    /// let counter = CounterConfig {
    ///     name: "biomarato".to_owned(),
    ///     project_ids: vec![1, 2],
    ///     output: "global/counter.csv".to_owned(),
    /// };
    /// assert_eq!(counter.location().to_string(), "global/counter.csv");
    /// ```
    pub fn location(&self) -> TableLocation {
        match self.output.rsplit_once('/') {
            Some((dataset, file_name)) => TableLocation::new(dataset, file_name),
            None => TableLocation::new("", self.output.as_str()),
        }
    }
}
