//! Driven port for the upstream observation API.
//!
//! The domain owns the query shape (endpoint plus filter parameters) and
//! receives raw JSON documents. Every listing and counting endpoint answers
//! with an object exposing `total_results` and, for listings, `results`.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use super::define_port_error;

/// Read-only endpoints queried by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// Observation search; `total_results` counts observations.
    Observations,
    /// Per-taxon leaf counts; `total_results` counts species.
    SpeciesCounts,
    /// Per-user observation and species counts.
    Observers,
    /// Per-user identification counts.
    Identifiers,
}

impl Endpoint {
    /// Path of the endpoint relative to the API base URL.
    pub const fn path(self) -> &'static str {
        match self {
            Self::Observations => "observations",
            Self::SpeciesCounts => "observations/species_counts",
            Self::Observers => "observations/observers",
            Self::Identifiers => "observations/identifiers",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// One API request: an endpoint plus its query parameters.
///
/// Parameters are kept sorted by name so the canonical form is stable.
///
/// # Examples
///
/// ```
/// use collector::domain::ports::{ApiQuery, Endpoint};
///
/// let query = ApiQuery::new(Endpoint::Observers)
///     .with_param("project_id", 417)
///     .with_param("quality_grade", "research");
/// assert_eq!(query.param("project_id"), Some("417"));
/// assert_eq!(
///     query.canonical(),
///     "observations/observers?project_id=417&quality_grade=research"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiQuery {
    endpoint: Endpoint,
    params: BTreeMap<String, String>,
}

impl ApiQuery {
    /// Start a query against `endpoint` with no parameters.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            params: BTreeMap::new(),
        }
    }

    /// Set `key` to `value`, replacing any previous value.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Apply every `(key, value)` filter in order.
    #[must_use]
    pub fn with_filters<'a>(self, filters: impl IntoIterator<Item = &'a (String, String)>) -> Self {
        filters
            .into_iter()
            .fold(self, |query, (key, value)| query.with_param(key.as_str(), value))
    }

    /// Return a copy of this query targeting another endpoint.
    #[must_use]
    pub fn retarget(&self, endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            params: self.params.clone(),
        }
    }

    /// Endpoint the query targets.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Sorted query parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Value of one parameter, when set.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Stable textual form: `path?k1=v1&k2=v2` with keys in sorted order.
    pub fn canonical(&self) -> String {
        if self.params.is_empty() {
            return self.endpoint.path().to_owned();
        }
        let query = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.endpoint.path())
    }
}

impl fmt::Display for ApiQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

define_port_error! {
    /// Errors surfaced while calling the observation API.
    pub enum ObservationApiError {
        /// Network transport failed before receiving a response.
        Transport { message: String } =>
            "observation API transport failed: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } =>
            "observation API timeout: {message}",
        /// The API rate-limited the request (HTTP 429).
        RateLimited { message: String } =>
            "observation API rate limited request: {message}",
        /// The API answered with a server error status.
        Server { message: String } =>
            "observation API server error: {message}",
        /// The response was not the expected JSON document.
        Decode { message: String } =>
            "observation API response decode failed: {message}",
        /// The API rejected the request; retrying will not help.
        Rejected { message: String } =>
            "observation API rejected request: {message}",
    }
}

impl ObservationApiError {
    /// Return whether retrying this error is expected to help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Port for issuing read-only queries against the observation API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObservationApi: Send + Sync {
    /// Execute `query` once and return the decoded JSON body.
    ///
    /// Implementations perform no retries, throttling or caching; those
    /// policies live in the domain's rate-limited client.
    async fn fetch_json(&self, query: &ApiQuery) -> Result<Value, ObservationApiError>;
}
