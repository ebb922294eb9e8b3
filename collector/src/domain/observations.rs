//! Observation and photo dumps kept in sync with the upstream API.
//!
//! A dump is refreshed incrementally: observations above the highest known
//! identifier are appended, observations updated since a cutoff day replace
//! their previous versions, and observations that have left the accepted
//! quality grade are removed together with their photos.

use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::api_client::RateLimitedClient;
use crate::domain::ports::{ApiQuery, Endpoint};

/// Observation search caps `per_page` at 200.
const OBSERVATION_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(200) {
    Some(size) => size,
    None => NonZeroU32::MIN,
};

const CASUAL_GRADE: &str = "casual";

/// Flattened observation as persisted in the observation table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservationRecord {
    /// Observation identifier.
    pub id: u64,
    /// Creation timestamp as reported upstream.
    pub created_at: String,
    /// Last update timestamp as reported upstream.
    pub updated_at: String,
    /// Day the organism was observed.
    pub observed_on: Option<String>,
    /// Identified taxon.
    pub taxon_id: Option<u64>,
    /// Identified taxon's scientific name.
    pub taxon_name: Option<String>,
    /// Identified taxon's rank.
    pub taxon_rank: Option<String>,
    /// Iconic group of the identified taxon.
    pub iconic_taxon: Option<String>,
    /// Observer identifier.
    pub user_id: Option<u64>,
    /// Observer login.
    pub user_login: String,
    /// Quality grade.
    pub quality_grade: String,
    /// Latitude, verbatim.
    pub latitude: Option<String>,
    /// Longitude, verbatim.
    pub longitude: Option<String>,
    /// Free-text place description.
    pub place_guess: Option<String>,
}

/// One photo attached to an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    /// Photo identifier.
    pub photos_id: u64,
    /// Owning observation identifier.
    pub id: u64,
    /// Photo URL.
    pub photo_url: String,
    /// Licence code, when set.
    pub license: Option<String>,
    /// Owning observation's observer login.
    pub user_login: String,
}

/// Observations and their photos for one project.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservationDump {
    /// Observations, sorted by identifier descending once normalised.
    pub observations: Vec<ObservationRecord>,
    /// Photos, sorted by photo identifier descending once normalised.
    pub photos: Vec<PhotoRecord>,
}

impl ObservationDump {
    /// Highest observation identifier in the dump.
    pub fn max_id(&self) -> Option<u64> {
        self.observations.iter().map(|observation| observation.id).max()
    }

    /// Whether the dump holds no observations.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    fn extend(&mut self, other: Self) {
        self.observations.extend(other.observations);
        self.photos.extend(other.photos);
    }

    fn remove_observations(&mut self, ids: &BTreeSet<u64>) {
        self.observations
            .retain(|observation| !ids.contains(&observation.id));
        self.photos.retain(|photo| !ids.contains(&photo.id));
    }

    fn normalise(&mut self) {
        self.observations.sort_by(|left, right| right.id.cmp(&left.id));
        self.observations.dedup_by_key(|observation| observation.id);
        self.photos
            .sort_by(|left, right| right.photos_id.cmp(&left.photos_id));
        self.photos.dedup_by_key(|photo| photo.photos_id);
    }
}

/// Which quality grades a dump keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeFilter {
    /// Keep every grade except `casual`.
    ExcludeCasual,
    /// Keep exactly one grade.
    Only(String),
}

impl GradeFilter {
    /// Build the filter for an optional campaign grade.
    pub fn for_campaign(grade: Option<&str>) -> Self {
        grade.map_or(Self::ExcludeCasual, |grade| Self::Only(grade.to_owned()))
    }

    /// Whether an observation of `grade` belongs in the dump.
    pub fn accepts(&self, grade: &str) -> bool {
        match self {
            Self::ExcludeCasual => grade != CASUAL_GRADE,
            Self::Only(expected) => grade == expected,
        }
    }

    fn query_grade(&self) -> Option<&str> {
        match self {
            Self::ExcludeCasual => None,
            Self::Only(grade) => Some(grade.as_str()),
        }
    }
}

/// Upstream changes to fold into a dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationDelta {
    /// Observations created after the dump's highest identifier.
    pub created: ObservationDump,
    /// Observations updated since the cutoff that are still accepted.
    pub updated: ObservationDump,
    /// Observations updated since the cutoff that are no longer accepted.
    pub rejected_ids: BTreeSet<u64>,
}

/// Fold `delta` into `previous`.
///
/// Updated observations replace earlier versions and all of their photos.
/// The result is sorted by identifier descending, so merging the same delta
/// twice is a no-op.
pub fn merge_dump(previous: ObservationDump, delta: ObservationDelta) -> ObservationDump {
    let ObservationDelta {
        created,
        updated,
        rejected_ids,
    } = delta;

    let mut merged = previous;
    let replaced = created
        .observations
        .iter()
        .chain(&updated.observations)
        .map(|observation| observation.id)
        .collect::<BTreeSet<_>>();
    merged.remove_observations(&replaced);
    merged.extend(created);
    merged.extend(updated);
    merged.remove_observations(&rejected_ids);
    merged.normalise();
    merged
}

#[derive(Debug, Deserialize)]
struct ObservationDto {
    id: u64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    observed_on: Option<String>,
    #[serde(default)]
    taxon: Option<ObservedTaxonDto>,
    #[serde(default)]
    user: Option<ObserverDto>,
    #[serde(default)]
    quality_grade: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    place_guess: Option<String>,
    #[serde(default)]
    photos: Vec<PhotoDto>,
}

#[derive(Debug, Deserialize)]
struct ObservedTaxonDto {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    rank: Option<String>,
    #[serde(default)]
    iconic_taxon_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObserverDto {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
struct PhotoDto {
    id: u64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    license_code: Option<String>,
}

/// Decode one observation document into a record and its photos.
///
/// # Errors
///
/// Returns the decode error when the document lacks an integer `id`.
pub fn decode_observation(
    row: Value,
) -> Result<(ObservationRecord, Vec<PhotoRecord>), serde_json::Error> {
    let dto = serde_json::from_value::<ObservationDto>(row)?;
    let (user_id, user_login) = dto
        .user
        .map_or((None, String::new()), |user| (user.id, user.login));
    let (latitude, longitude) = dto
        .location
        .as_deref()
        .and_then(|location| location.split_once(','))
        .map_or((None, None), |(lat, lng)| {
            (Some(lat.trim().to_owned()), Some(lng.trim().to_owned()))
        });
    let (taxon_id, taxon_name, taxon_rank, iconic_taxon) =
        dto.taxon.map_or((None, None, None, None), |taxon| {
            (
                Some(taxon.id),
                taxon.name,
                taxon.rank,
                taxon.iconic_taxon_name,
            )
        });

    let photos = dto
        .photos
        .into_iter()
        .map(|photo| PhotoRecord {
            photos_id: photo.id,
            id: dto.id,
            photo_url: photo.url,
            license: photo.license_code,
            user_login: user_login.clone(),
        })
        .collect();

    let record = ObservationRecord {
        id: dto.id,
        created_at: dto.created_at.unwrap_or_default(),
        updated_at: dto.updated_at.unwrap_or_default(),
        observed_on: dto.observed_on,
        taxon_id,
        taxon_name,
        taxon_rank,
        iconic_taxon,
        user_id,
        user_login,
        quality_grade: dto.quality_grade.unwrap_or_default(),
        latitude,
        longitude,
        place_guess: dto.place_guess,
    };
    Ok((record, photos))
}

/// Fetches observation deltas for a project.
pub struct ObservationSync {
    client: Arc<RateLimitedClient>,
}

impl ObservationSync {
    /// Build a sync service sharing `client`.
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }

    /// Refresh `previous` (or build from scratch) for `project_id`.
    ///
    /// `updated_since` bounds the re-fetch of edited observations.
    pub async fn refresh(
        &self,
        project_id: u64,
        grades: &GradeFilter,
        previous: ObservationDump,
        updated_since: NaiveDate,
    ) -> ObservationDump {
        let delta = self
            .fetch_delta(project_id, grades, previous.max_id(), updated_since)
            .await;
        info!(
            project_id,
            created = delta.created.observations.len(),
            updated = delta.updated.observations.len(),
            rejected = delta.rejected_ids.len(),
            "merging observation delta"
        );
        merge_dump(previous, delta)
    }

    /// Fetch the changes relative to a dump whose highest identifier is `max_id`.
    ///
    /// When a page of new observations is missing, only the pages before it
    /// are kept and updated observations above them are deferred, so the
    /// next run's `id_above` resumes at the gap.
    pub async fn fetch_delta(
        &self,
        project_id: u64,
        grades: &GradeFilter,
        max_id: Option<u64>,
        updated_since: NaiveDate,
    ) -> ObservationDelta {
        let mut created_query = ApiQuery::new(Endpoint::Observations)
            .with_param("project_id", project_id)
            .with_param("order_by", "id")
            .with_param("order", "asc");
        if let Some(max_id) = max_id {
            created_query = created_query.with_param("id_above", max_id);
        }
        if let Some(grade) = grades.query_grade() {
            created_query = created_query.with_param("quality_grade", grade);
        }
        let updated_query = ApiQuery::new(Endpoint::Observations)
            .with_param("project_id", project_id)
            .with_param("order_by", "id")
            .with_param("order", "asc")
            .with_param("updated_since", updated_since.format("%Y-%m-%d"));

        let (created, updated) = futures_util::join!(
            self.client
                .fetch_listing(&created_query, OBSERVATION_PAGE_SIZE),
            self.client
                .fetch_listing(&updated_query, OBSERVATION_PAGE_SIZE),
        );
        let created_complete = created.is_complete();
        let created_rows = decode_rows(created.into_leading_rows(), project_id);
        let ceiling = created_rows
            .iter()
            .map(|(record, _)| record.id)
            .max()
            .or(max_id)
            .unwrap_or(0);

        let mut delta = ObservationDelta::default();
        for (record, photos) in created_rows {
            if grades.accepts(&record.quality_grade) {
                delta.created.observations.push(record);
                delta.created.photos.extend(photos);
            }
        }
        for (record, photos) in decode_rows(updated.into_rows(), project_id) {
            if !grades.accepts(&record.quality_grade) {
                delta.rejected_ids.insert(record.id);
            } else if created_complete || record.id <= ceiling {
                delta.updated.observations.push(record);
                delta.updated.photos.extend(photos);
            }
        }
        if !created_complete {
            warn!(
                project_id,
                ceiling,
                "new observations incomplete, deferring those above the last contiguous id"
            );
        }
        delta
    }
}

fn decode_rows(rows: Vec<Value>, project_id: u64) -> Vec<(ObservationRecord, Vec<PhotoRecord>)> {
    rows.into_iter()
        .filter_map(|row| match decode_observation(row) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(project_id, error = %error, "skipping undecodable observation");
                None
            }
        })
        .collect()
}
