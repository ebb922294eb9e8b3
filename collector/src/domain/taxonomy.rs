//! Marine/terrestrial classification of a project's species and observations.
//!
//! The species listing comes from the paginated species-count endpoint and is
//! left-joined against the static taxonomy reference. Taxa the reference does
//! not know keep an unknown (`None`) classification.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::api_client::RateLimitedClient;
use super::observations::ObservationRecord;
use crate::domain::ports::{
    ApiQuery, Endpoint, MarineFlags, TaxonomyReference, TaxonomyReferenceError,
};

/// Placeholder spellings treated as a missing taxon identifier.
const MISSING_TAXON_MARKERS: [&str; 5] = ["missing", "nan", "none", "null", "na"];

/// Parse a stored taxon identifier, treating blanks and placeholders as missing.
///
/// # Examples
///
/// ```
/// use collector::domain::parse_taxon_key;
///
/// assert_eq!(parse_taxon_key("48460"), Some(48460));
/// assert_eq!(parse_taxon_key("48460.0"), Some(48460));
/// assert_eq!(parse_taxon_key("missing"), None);
/// assert_eq!(parse_taxon_key(""), None);
/// ```
pub fn parse_taxon_key(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || MISSING_TAXON_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        return None;
    }
    let integral = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    integral.parse().ok()
}

/// One taxon of a project's species listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesEntry {
    /// Taxon identifier.
    pub taxon_id: u64,
    /// Scientific name.
    pub taxon_name: String,
    /// Taxonomic rank.
    pub rank: String,
    /// Slash-separated ancestor identifiers.
    pub ancestry: String,
    /// Marine flag from the reference; `None` when the taxon is unknown.
    pub marine: Option<bool>,
}

/// Habitat partition used by the rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    /// Land and freshwater taxa.
    Terrestrial,
    /// Marine taxa.
    Marine,
}

impl Environment {
    fn from_flag(marine: bool) -> Self {
        if marine { Self::Marine } else { Self::Terrestrial }
    }

    /// Output label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Terrestrial => "terrestrial",
            Self::Marine => "marine",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observation and distinct-species counts for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRollup {
    /// Habitat partition.
    pub environment: Environment,
    /// Observations whose taxon falls in the partition.
    pub observations: u64,
    /// Distinct taxon names in the partition.
    pub species: u64,
}

/// Result of attempting a marine/terrestrial rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollupOutcome {
    /// Both environments were present; rows sorted by observations, descending.
    Computed(Vec<EnvironmentRollup>),
    /// The rollup could not be formed.
    Skipped {
        /// Why no rollup was produced.
        reason: String,
    },
}

/// Left-join `species` against `flags`, setting each entry's `marine` field.
pub fn classify_species(species: Vec<SpeciesEntry>, flags: &MarineFlags) -> Vec<SpeciesEntry> {
    species
        .into_iter()
        .map(|entry| SpeciesEntry {
            marine: flags.get(entry.taxon_id),
            ..entry
        })
        .collect()
}

/// Group `observations` by the marine flag of their taxon.
///
/// Observations without a taxon, or whose taxon has no classification, are
/// left out. When either environment ends up empty the rollup is skipped.
pub fn rollup_environments(
    observations: &[ObservationRecord],
    species: &[SpeciesEntry],
) -> RollupOutcome {
    let flags: HashMap<u64, bool> = species
        .iter()
        .filter_map(|entry| entry.marine.map(|marine| (entry.taxon_id, marine)))
        .collect();

    let mut counts: HashMap<Environment, (u64, BTreeSet<&str>)> = HashMap::new();
    for observation in observations {
        let Some(taxon_id) = observation.taxon_id else {
            continue;
        };
        let Some(marine) = flags.get(&taxon_id) else {
            continue;
        };
        let (observed, names) = counts.entry(Environment::from_flag(*marine)).or_default();
        *observed += 1;
        if let Some(name) = observation.taxon_name.as_deref() {
            names.insert(name);
        }
    }

    for environment in [Environment::Terrestrial, Environment::Marine] {
        if !counts.contains_key(&environment) {
            return RollupOutcome::Skipped {
                reason: format!("no {environment} observations to roll up"),
            };
        }
    }

    let mut rows = counts
        .into_iter()
        .map(|(environment, (observations, names))| EnvironmentRollup {
            environment,
            observations,
            species: u64::try_from(names.len()).unwrap_or(u64::MAX),
        })
        .collect::<Vec<_>>();
    rows.sort_by(|left, right| {
        right
            .observations
            .cmp(&left.observations)
            .then(left.environment.cmp(&right.environment))
    });
    RollupOutcome::Computed(rows)
}

#[derive(Debug, Deserialize)]
struct SpeciesCountDto {
    taxon: TaxonDto,
}

#[derive(Debug, Deserialize)]
struct TaxonDto {
    id: u64,
    name: String,
    #[serde(default)]
    rank: String,
    #[serde(default)]
    ancestry: Option<String>,
}

/// Loads a project's species listing and classifies it.
pub struct TaxonomicClassifier {
    client: Arc<RateLimitedClient>,
    reference: Arc<dyn TaxonomyReference>,
}

impl TaxonomicClassifier {
    /// Build a classifier from the shared client and the reference port.
    pub fn new(client: Arc<RateLimitedClient>, reference: Arc<dyn TaxonomyReference>) -> Self {
        Self { client, reference }
    }

    /// Every species-count entry for `project_id`, unclassified.
    pub async fn species_listing(&self, project_id: u64) -> Vec<SpeciesEntry> {
        let query = ApiQuery::new(Endpoint::SpeciesCounts).with_param("project_id", project_id);
        self.client
            .fetch_all_results(&query)
            .await
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<SpeciesCountDto>(row) {
                Ok(dto) => Some(SpeciesEntry {
                    taxon_id: dto.taxon.id,
                    taxon_name: dto.taxon.name,
                    rank: dto.taxon.rank,
                    ancestry: dto.taxon.ancestry.unwrap_or_default(),
                    marine: None,
                }),
                Err(error) => {
                    warn!(project_id, error = %error, "skipping undecodable species row");
                    None
                }
            })
            .collect()
    }

    /// The species listing for `project_id` joined with the reference.
    ///
    /// # Errors
    ///
    /// Returns the reference error when the marine flags cannot be loaded.
    pub async fn classified_species(
        &self,
        project_id: u64,
    ) -> Result<Vec<SpeciesEntry>, TaxonomyReferenceError> {
        let flags = self.reference.marine_flags().await?;
        let species = self.species_listing(project_id).await;
        let classified = classify_species(species, &flags);
        debug!(
            project_id,
            species = classified.len(),
            classified = classified.iter().filter(|entry| entry.marine.is_some()).count(),
            "classified species listing"
        );
        Ok(classified)
    }
}
