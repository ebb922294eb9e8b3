//! Domain services and driven ports for the dataset collector.
//!
//! Purpose: turn upstream observation API responses into the tables a
//! campaign publishes. Nothing here performs I/O directly; HTTP, filesystem
//! and reference-data access go through the traits in [`ports`].
//!
//! Public surface:
//! - [`RateLimitedClient`]: throttled, retrying, caching API access.
//! - [`MetricsAggregator`], [`ParticipationAggregator`],
//!   [`TaxonomicClassifier`] and [`ObservationSync`]: per-table builders.
//! - [`DatasetUpdater`]: per-campaign orchestration with a [`CampaignReport`].
//! - [`Error`] and [`ErrorCode`]: failure payload for steps and configuration.

pub mod api_client;
pub mod campaign;
pub mod error;
pub mod metrics;
pub mod observations;
pub mod participation;
pub mod ports;
pub mod runtime;
pub mod tables;
pub mod taxonomy;
pub mod throttle;
pub mod updater;

pub use self::api_client::{ApiClientPorts, ApiFailure, ClientPolicy, Listing, RateLimitedClient};
pub use self::campaign::{Campaign, CounterConfig, ProjectTables};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::metrics::{
    DailyMetric, DayRange, MetricScope, MetricSnapshot, MetricsAggregator, SeriesSchedule,
};
pub use self::observations::{
    GradeFilter, ObservationDelta, ObservationDump, ObservationRecord, ObservationSync,
    PhotoRecord, merge_dump,
};
pub use self::participation::{
    Denylist, IdentifierEntry, ObserverEntry, ParticipantRow, ParticipationAggregator,
    join_participation,
};
pub use self::runtime::{Sleeper, TokioSleeper};
pub use self::taxonomy::{
    Environment, EnvironmentRollup, RollupOutcome, SpeciesEntry, TaxonomicClassifier,
    classify_species, parse_taxon_key, rollup_environments,
};
pub use self::throttle::RequestThrottle;
pub use self::updater::{CampaignReport, DatasetUpdater, StepOutcome, StepReport, UpdaterPorts};
