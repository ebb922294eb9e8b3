//! Conversions between domain rows and persisted tables.
//!
//! Column order here is the on-disk contract; readers look columns up by
//! name so older files with extra or reordered columns still load.

use table_store::{Table, TableError};

use super::metrics::{DailyMetric, MetricSnapshot};
use super::observations::{ObservationDump, ObservationRecord, PhotoRecord};
use super::participation::ParticipantRow;
use super::taxonomy::{EnvironmentRollup, SpeciesEntry, parse_taxon_key};

/// Daily series columns.
pub const DAILY_SERIES_COLUMNS: [&str; 4] = ["date", "observations", "species", "participants"];

/// Per-place snapshot columns.
pub const PLACE_SNAPSHOT_COLUMNS: [&str; 5] =
    ["project", "city", "observations", "species", "participants"];

/// Observation dump columns.
pub const OBSERVATION_COLUMNS: [&str; 14] = [
    "id",
    "created_at",
    "updated_at",
    "observed_on",
    "taxon_id",
    "taxon_name",
    "taxon_rank",
    "iconic_taxon",
    "user_id",
    "user_login",
    "quality_grade",
    "latitude",
    "longitude",
    "place_guess",
];

/// Photo dump columns.
pub const PHOTO_COLUMNS: [&str; 5] = ["photos_id", "id", "photo_url", "license", "user_login"];

/// Classified species columns.
pub const SPECIES_COLUMNS: [&str; 5] = ["taxon_id", "taxon_name", "rank", "ancestry", "marine"];

/// Participation columns.
pub const PARTICIPATION_COLUMNS: [&str; 4] =
    ["PARTICIPANT", "OBSERVATIONS", "SPECIES", "IDENTIFICATIONS"];

/// Marine/terrestrial rollup columns.
pub const ROLLUP_COLUMNS: [&str; 3] = ["environment", "observations", "species"];

/// Realtime totals columns.
pub const TOTALS_COLUMNS: [&str; 2] = ["metric", "value"];

/// Global counter columns.
pub const COUNTER_COLUMNS: [&str; 3] = ["observations", "species", "participants"];

fn build<I>(columns: &[&str], rows: I) -> Result<Table, TableError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut table = Table::new(columns.iter().copied());
    for row in rows {
        table.push_row(row)?;
    }
    Ok(table)
}

fn optional<T: ToString>(value: Option<&T>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

fn snapshot_cells(snapshot: &MetricSnapshot) -> [String; 3] {
    [
        snapshot.observations.to_string(),
        snapshot.species.to_string(),
        snapshot.participants.to_string(),
    ]
}

/// Build the daily series table.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn daily_series_table(series: &[DailyMetric]) -> Result<Table, TableError> {
    build(
        &DAILY_SERIES_COLUMNS,
        series.iter().map(|day| {
            let mut row = vec![day.date.format("%Y-%m-%d").to_string()];
            row.extend(snapshot_cells(&day.snapshot));
            row
        }),
    )
}

/// One row of the per-place snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceSnapshot {
    /// Place project identifier.
    pub project_id: u64,
    /// Display name of the place.
    pub city: String,
    /// Totals for the place.
    pub snapshot: MetricSnapshot,
}

/// Build the per-place snapshot table.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn place_snapshot_table(places: &[PlaceSnapshot]) -> Result<Table, TableError> {
    build(
        &PLACE_SNAPSHOT_COLUMNS,
        places.iter().map(|place| {
            let mut row = vec![place.project_id.to_string(), place.city.clone()];
            row.extend(snapshot_cells(&place.snapshot));
            row
        }),
    )
}

/// Build the observation table of a dump.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn observations_table(observations: &[ObservationRecord]) -> Result<Table, TableError> {
    build(
        &OBSERVATION_COLUMNS,
        observations.iter().map(|record| {
            vec![
                record.id.to_string(),
                record.created_at.clone(),
                record.updated_at.clone(),
                record.observed_on.clone().unwrap_or_default(),
                optional(record.taxon_id.as_ref()),
                record.taxon_name.clone().unwrap_or_default(),
                record.taxon_rank.clone().unwrap_or_default(),
                record.iconic_taxon.clone().unwrap_or_default(),
                optional(record.user_id.as_ref()),
                record.user_login.clone(),
                record.quality_grade.clone(),
                record.latitude.clone().unwrap_or_default(),
                record.longitude.clone().unwrap_or_default(),
                record.place_guess.clone().unwrap_or_default(),
            ]
        }),
    )
}

/// Build the photo table of a dump.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn photos_table(photos: &[PhotoRecord]) -> Result<Table, TableError> {
    build(
        &PHOTO_COLUMNS,
        photos.iter().map(|photo| {
            vec![
                photo.photos_id.to_string(),
                photo.id.to_string(),
                photo.photo_url.clone(),
                photo.license.clone().unwrap_or_default(),
                photo.user_login.clone(),
            ]
        }),
    )
}

/// Build the classified species table. Unknown classifications are blank.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn species_table(species: &[SpeciesEntry]) -> Result<Table, TableError> {
    build(
        &SPECIES_COLUMNS,
        species.iter().map(|entry| {
            vec![
                entry.taxon_id.to_string(),
                entry.taxon_name.clone(),
                entry.rank.clone(),
                entry.ancestry.clone(),
                optional(entry.marine.as_ref()),
            ]
        }),
    )
}

/// Build the participation table.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn participation_table(rows: &[ParticipantRow]) -> Result<Table, TableError> {
    build(
        &PARTICIPATION_COLUMNS,
        rows.iter().map(|row| {
            vec![
                row.participant.clone(),
                row.observations.to_string(),
                row.species.to_string(),
                row.identifications.to_string(),
            ]
        }),
    )
}

/// Build the rollup table.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn rollup_table(rollup: &[EnvironmentRollup]) -> Result<Table, TableError> {
    build(
        &ROLLUP_COLUMNS,
        rollup.iter().map(|row| {
            vec![
                row.environment.label().to_owned(),
                row.observations.to_string(),
                row.species.to_string(),
            ]
        }),
    )
}

/// Build the `metric,value` totals table.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn totals_table(totals: &MetricSnapshot) -> Result<Table, TableError> {
    build(
        &TOTALS_COLUMNS,
        COUNTER_COLUMNS
            .iter()
            .zip(snapshot_cells(totals))
            .map(|(metric, value)| vec![(*metric).to_owned(), value]),
    )
}

/// Build the single-row global counter table.
///
/// # Errors
///
/// Propagates [`TableError`] from row construction.
pub fn counter_table(totals: &MetricSnapshot) -> Result<Table, TableError> {
    build(&COUNTER_COLUMNS, [snapshot_cells(totals).to_vec()])
}

/// Observation total recorded in a counter table, if readable.
pub fn counter_observations(table: &Table) -> Option<u64> {
    table
        .column_values("observations")
        .next()
        .and_then(|value| value.trim().parse().ok())
}

fn row_views(table: &Table) -> impl Iterator<Item = RowView<'_>> {
    table.rows().iter().map(move |cells| RowView { table, cells })
}

struct RowView<'a> {
    table: &'a Table,
    cells: &'a [String],
}

impl RowView<'_> {
    /// Cell text exactly as stored.
    fn text(&self, column: &str) -> &str {
        self.table
            .column_index(column)
            .and_then(|index| self.cells.get(index))
            .map_or("", String::as_str)
    }

    fn optional_text(&self, column: &str) -> Option<String> {
        Some(self.text(column))
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }

    /// Identifier cell, tolerating surrounding whitespace.
    fn key(&self, column: &str) -> Option<u64> {
        parse_taxon_key(self.text(column))
    }
}

/// Read a dump back from its observation and photo tables.
///
/// Rows whose identifier does not parse are dropped.
pub fn dump_from_tables(observations: Option<&Table>, photos: Option<&Table>) -> ObservationDump {
    let observations = observations.map_or_else(Vec::new, |table| {
        row_views(table)
            .filter_map(|row| {
                Some(ObservationRecord {
                    id: row.key("id")?,
                    created_at: row.text("created_at").to_owned(),
                    updated_at: row.text("updated_at").to_owned(),
                    observed_on: row.optional_text("observed_on"),
                    taxon_id: row.key("taxon_id"),
                    taxon_name: row.optional_text("taxon_name"),
                    taxon_rank: row.optional_text("taxon_rank"),
                    iconic_taxon: row.optional_text("iconic_taxon"),
                    user_id: row.key("user_id"),
                    user_login: row.text("user_login").to_owned(),
                    quality_grade: row.text("quality_grade").to_owned(),
                    latitude: row.optional_text("latitude"),
                    longitude: row.optional_text("longitude"),
                    place_guess: row.optional_text("place_guess"),
                })
            })
            .collect()
    });
    let photos = photos.map_or_else(Vec::new, |table| {
        row_views(table)
            .filter_map(|row| {
                Some(PhotoRecord {
                    photos_id: row.key("photos_id")?,
                    id: row.key("id")?,
                    photo_url: row.text("photo_url").to_owned(),
                    license: row.optional_text("license"),
                    user_login: row.text("user_login").to_owned(),
                })
            })
            .collect()
    });
    ObservationDump {
        observations,
        photos,
    }
}

#[cfg(test)]
mod tests {
    //! Column contracts and read-back of persisted dumps.

    use chrono::NaiveDate;
    use rstest::rstest;

    use super::*;
    use crate::domain::taxonomy::Environment;
    use crate::test_support::observations::{observation, photo};

    #[rstest]
    fn totals_are_written_as_metric_value_pairs() {
        let table = totals_table(&MetricSnapshot {
            observations: 120,
            species: 45,
            participants: 9,
        })
        .expect("table");
        assert_eq!(table.columns(), TOTALS_COLUMNS);
        assert_eq!(
            table.rows(),
            [
                vec!["observations".to_owned(), "120".to_owned()],
                vec!["species".to_owned(), "45".to_owned()],
                vec!["participants".to_owned(), "9".to_owned()],
            ]
        );
    }

    #[rstest]
    fn daily_series_rows_use_iso_dates() {
        let day = NaiveDate::from_ymd_opt(2025, 5, 3).expect("valid date");
        let table = daily_series_table(&[DailyMetric {
            date: day,
            snapshot: MetricSnapshot {
                observations: 3,
                species: 2,
                participants: 1,
            },
        }])
        .expect("table");
        assert_eq!(table.rows()[0], ["2025-05-03", "3", "2", "1"]);
    }

    #[rstest]
    #[case(Some(true), "true")]
    #[case(Some(false), "false")]
    #[case(None, "")]
    fn species_marine_flag_cells(#[case] marine: Option<bool>, #[case] expected: &str) {
        let table = species_table(&[SpeciesEntry {
            taxon_id: 1,
            taxon_name: "Posidonia oceanica".to_owned(),
            rank: "species".to_owned(),
            ancestry: "48460/1".to_owned(),
            marine,
        }])
        .expect("table");
        assert_eq!(table.column_values("marine").next(), Some(expected));
    }

    #[rstest]
    fn participation_headers_are_uppercase() {
        let table = participation_table(&[]).expect("table");
        assert_eq!(
            table.columns(),
            ["PARTICIPANT", "OBSERVATIONS", "SPECIES", "IDENTIFICATIONS"]
        );
        assert!(table.is_empty());
    }

    #[rstest]
    fn rollup_rows_use_environment_labels() {
        let table = rollup_table(&[EnvironmentRollup {
            environment: Environment::Marine,
            observations: 4,
            species: 2,
        }])
        .expect("table");
        assert_eq!(table.rows()[0], ["marine", "4", "2"]);
    }

    #[rstest]
    fn dumps_survive_a_table_round_trip() {
        let mut record = observation(42, Some(48460), Some("Octopus vulgaris"));
        record.latitude = Some("41.38".to_owned());
        let dump = ObservationDump {
            observations: vec![record, observation(41, None, None)],
            photos: vec![photo(420, 42)],
        };
        let obs = observations_table(&dump.observations).expect("obs table");
        let photos = photos_table(&dump.photos).expect("photos table");

        assert_eq!(dump_from_tables(Some(&obs), Some(&photos)), dump);
    }

    #[rstest]
    fn padded_text_cells_read_back_verbatim() {
        let mut record = observation(42, Some(48460), Some(" Octopus vulgaris"));
        record.place_guess = Some(" Barcelona ".to_owned());
        record.user_login = "diver ".to_owned();
        let mut padded_photo = photo(420, 42);
        padded_photo.user_login = "diver ".to_owned();
        let stored_obs = observations_table(std::slice::from_ref(&record)).expect("obs table");
        let stored_photos = photos_table(std::slice::from_ref(&padded_photo)).expect("photos table");

        let dump = dump_from_tables(Some(&stored_obs), Some(&stored_photos));

        assert_eq!(dump.observations, vec![record]);
        assert_eq!(dump.photos, vec![padded_photo]);
        assert_eq!(
            observations_table(&dump.observations).expect("rebuilt"),
            stored_obs,
            "an untouched dump rebuilds the stored table"
        );
    }

    #[rstest]
    fn placeholder_taxon_keys_read_back_as_missing() {
        let mut table = Table::new(OBSERVATION_COLUMNS);
        let mut row = vec![String::new(); OBSERVATION_COLUMNS.len()];
        row[0] = "7".to_owned();
        row[4] = "missing".to_owned();
        table.push_row(row).expect("row");

        let dump = dump_from_tables(Some(&table), None);
        assert_eq!(dump.observations[0].taxon_id, None);
        assert_eq!(dump.observations[0].id, 7);
    }

    #[rstest]
    fn counter_observations_reads_first_row() {
        let table = counter_table(&MetricSnapshot {
            observations: 77,
            ..MetricSnapshot::default()
        })
        .expect("table");
        assert_eq!(counter_observations(&table), Some(77));
        assert_eq!(counter_observations(&Table::new(COUNTER_COLUMNS)), None);
    }
}
