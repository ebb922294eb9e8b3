//! JSON campaign registry.
//!
//! The registry lists every campaign and global counter the collector
//! refreshes. It is validated as a whole on load so a typo fails the run
//! before any request is made.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use cap_std::{ambient_authority, fs::Dir};
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{Campaign, CounterConfig, Denylist};

const SUPPORTED_VERSION: u32 = 1;

/// Errors raised while loading the registry.
#[derive(Debug, Error)]
pub enum CampaignRegistryError {
    /// The file could not be read.
    #[error("failed to read campaign registry at '{path}': {source}")]
    Read {
        /// Registry path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file is not a registry document.
    #[error("campaign registry is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// The document parsed but breaks a registry rule.
    #[error("invalid campaign registry: {message}")]
    Invalid {
        /// Which rule was broken.
        message: String,
    },
}

fn invalid(message: impl Into<String>) -> CampaignRegistryError {
    CampaignRegistryError::Invalid {
        message: message.into(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RegistryDto {
    version: u32,
    #[serde(default)]
    campaigns: Vec<CampaignDto>,
    #[serde(default)]
    counters: Vec<CounterDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CampaignDto {
    name: String,
    main_project: u64,
    #[serde(default)]
    city_projects: BTreeMap<u64, String>,
    #[serde(default)]
    observation_projects: Vec<u64>,
    start_date: NaiveDate,
    #[serde(default)]
    end_date: Option<NaiveDate>,
    #[serde(default)]
    quality_grade: Option<String>,
    #[serde(default)]
    denylist: Vec<String>,
    output_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CounterDto {
    name: String,
    project_ids: Vec<u64>,
    output: String,
}

/// Validated campaigns and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRegistry {
    campaigns: Vec<Campaign>,
    counters: Vec<CounterConfig>,
}

impl CampaignRegistry {
    /// Read and validate the registry at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignRegistryError`] when the file cannot be read, parsed
    /// or validated.
    pub fn load(path: &Path) -> Result<Self, CampaignRegistryError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let read_error = |source| CampaignRegistryError::Read {
            path: path.to_path_buf(),
            source,
        };
        let file_name = path.file_name().ok_or_else(|| {
            read_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "registry path must be a file",
            ))
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
        let contents = dir
            .read_to_string(Path::new(file_name))
            .map_err(read_error)?;
        Self::from_json(&contents)
    }

    /// Parse and validate a registry document.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignRegistryError`] for malformed JSON or rule violations.
    pub fn from_json(contents: &str) -> Result<Self, CampaignRegistryError> {
        let dto: RegistryDto = serde_json::from_str(contents)?;
        if dto.version != SUPPORTED_VERSION {
            return Err(invalid(format!(
                "unsupported version {} (expected {SUPPORTED_VERSION})",
                dto.version
            )));
        }

        let mut names = BTreeSet::new();
        let campaigns = dto
            .campaigns
            .into_iter()
            .map(|campaign| {
                let campaign = campaign_from_dto(campaign)?;
                if !names.insert(campaign.name.clone()) {
                    return Err(invalid(format!("duplicate campaign '{}'", campaign.name)));
                }
                Ok(campaign)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut counter_names = BTreeSet::new();
        let counters = dto
            .counters
            .into_iter()
            .map(|counter| {
                let counter = counter_from_dto(counter)?;
                if !counter_names.insert(counter.name.clone()) {
                    return Err(invalid(format!("duplicate counter '{}'", counter.name)));
                }
                Ok(counter)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            campaigns,
            counters,
        })
    }

    /// Every campaign, in registry order.
    pub fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    /// Every counter, in registry order.
    pub fn counters(&self) -> &[CounterConfig] {
        &self.counters
    }

    /// Campaigns named in `only`, or all campaigns when `only` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignRegistryError::Invalid`] for an unknown name.
    pub fn select(&self, only: &[String]) -> Result<Vec<&Campaign>, CampaignRegistryError> {
        if only.is_empty() {
            return Ok(self.campaigns.iter().collect());
        }
        only.iter()
            .map(|name| {
                self.campaigns
                    .iter()
                    .find(|campaign| &campaign.name == name)
                    .ok_or_else(|| invalid(format!("unknown campaign '{name}'")))
            })
            .collect()
    }
}

fn relative_output(path: &str, field: &str, owner: &str) -> Result<String, CampaignRegistryError> {
    let trimmed = path.trim().trim_end_matches('/');
    let escapes = trimmed.starts_with('/')
        || trimmed
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if escapes {
        return Err(invalid(format!(
            "{owner}: {field} '{path}' must be a non-empty relative path"
        )));
    }
    Ok(trimmed.to_owned())
}

fn campaign_from_dto(dto: CampaignDto) -> Result<Campaign, CampaignRegistryError> {
    let name = dto.name.trim().to_owned();
    if name.is_empty() {
        return Err(invalid("campaign name must not be blank"));
    }
    if let Some(end_date) = dto.end_date
        && end_date < dto.start_date
    {
        return Err(invalid(format!(
            "{name}: endDate {end_date} precedes startDate {}",
            dto.start_date
        )));
    }
    let quality_grade = dto
        .quality_grade
        .map(|grade| grade.trim().to_owned())
        .filter(|grade| !grade.is_empty());
    let denylist = dto
        .denylist
        .iter()
        .map(|login| login.trim())
        .filter(|login| !login.is_empty())
        .map(str::to_owned)
        .collect::<Denylist>();
    let output_dir = relative_output(&dto.output_dir, "outputDir", &name)?;

    Ok(Campaign {
        name,
        main_project: dto.main_project,
        city_projects: dto.city_projects,
        observation_projects: dto.observation_projects,
        start_date: dto.start_date,
        end_date: dto.end_date,
        quality_grade,
        denylist,
        output_dir,
    })
}

fn counter_from_dto(dto: CounterDto) -> Result<CounterConfig, CampaignRegistryError> {
    let name = dto.name.trim().to_owned();
    if name.is_empty() {
        return Err(invalid("counter name must not be blank"));
    }
    if dto.project_ids.is_empty() {
        return Err(invalid(format!("{name}: projectIds must not be empty")));
    }
    let output = relative_output(&dto.output, "output", &name)?;
    if !output.ends_with(".csv") {
        return Err(invalid(format!("{name}: output '{output}' must be a .csv file")));
    }
    Ok(CounterConfig {
        name,
        project_ids: dto.project_ids,
        output,
    })
}
