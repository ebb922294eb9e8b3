//! Per-user participation: observers left-joined with identifiers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::api_client::RateLimitedClient;
use crate::domain::ports::{ApiQuery, Endpoint};

/// One row of the observer listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverEntry {
    /// Upstream user identifier.
    pub user_id: u64,
    /// User login.
    pub login: String,
    /// Observations by this user in the project.
    pub observation_count: u64,
    /// Species observed by this user in the project.
    pub species_count: u64,
}

/// One row of the identifier listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierEntry {
    /// Upstream user identifier.
    pub user_id: u64,
    /// Identifications made by this user in the project.
    pub count: u64,
}

/// Joined participation figures for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRow {
    /// User login.
    pub participant: String,
    /// Observation count.
    pub observations: u64,
    /// Species count.
    pub species: u64,
    /// Identification count, zero when the user never identified.
    pub identifications: u64,
}

/// Logins excluded from every participation-derived table.
///
/// Matching is exact and case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Denylist(BTreeSet<String>);

impl Denylist {
    /// Whether `login` is excluded.
    pub fn contains(&self, login: &str) -> bool {
        self.0.contains(login)
    }

    /// Number of excluded logins.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Denylist {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Left-join `identifiers` onto `observers` and drop denylisted logins.
///
/// Observer order is preserved. Identification counts for the same user are
/// summed; observers without identifications get zero.
///
/// # Examples
///
/// ```
/// use collector::domain::{Denylist, IdentifierEntry, ObserverEntry, join_participation};
///
/// let observers = vec![ObserverEntry {
///     user_id: 7,
///     login: "diver".to_owned(),
///     observation_count: 12,
///     species_count: 9,
/// }];
/// let rows = join_participation(&observers, &[], &Denylist::default());
/// assert_eq!(rows[0].identifications, 0);
/// ```
pub fn join_participation(
    observers: &[ObserverEntry],
    identifiers: &[IdentifierEntry],
    denylist: &Denylist,
) -> Vec<ParticipantRow> {
    let mut identifications: HashMap<u64, u64> = HashMap::new();
    for entry in identifiers {
        let total = identifications.entry(entry.user_id).or_default();
        *total = total.saturating_add(entry.count);
    }

    observers
        .iter()
        .filter(|observer| !denylist.contains(&observer.login))
        .map(|observer| ParticipantRow {
            participant: observer.login.clone(),
            observations: observer.observation_count,
            species: observer.species_count,
            identifications: identifications
                .get(&observer.user_id)
                .copied()
                .unwrap_or(0),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ObserverDto {
    user_id: u64,
    user: UserDto,
    #[serde(default)]
    observation_count: u64,
    #[serde(default)]
    species_count: u64,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IdentifierDto {
    user_id: u64,
    #[serde(default)]
    count: u64,
}

/// Fetches observer and identifier listings for a project.
pub struct ParticipationAggregator {
    client: Arc<RateLimitedClient>,
}

impl ParticipationAggregator {
    /// Build an aggregator sharing `client`.
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }

    /// Participation rows for `project_id`, optionally scoped to one quality grade.
    ///
    /// An unavailable listing is treated as empty.
    pub async fn participation(
        &self,
        project_id: u64,
        quality_grade: Option<&str>,
        denylist: &Denylist,
    ) -> Vec<ParticipantRow> {
        let mut base = ApiQuery::new(Endpoint::Observers).with_param("project_id", project_id);
        if let Some(grade) = quality_grade {
            base = base.with_param("quality_grade", grade);
        }

        let identifiers_query = base.retarget(Endpoint::Identifiers);

        let (observer_rows, identifier_rows) = futures_util::join!(
            self.client.fetch_all_results(&base),
            self.client.fetch_all_results(&identifiers_query),
        );
        let observers = decode_rows::<ObserverDto>(observer_rows, project_id, "observer")
            .into_iter()
            .map(|dto| ObserverEntry {
                user_id: dto.user_id,
                login: dto.user.login,
                observation_count: dto.observation_count,
                species_count: dto.species_count,
            })
            .collect::<Vec<_>>();
        let identifiers = decode_rows::<IdentifierDto>(identifier_rows, project_id, "identifier")
            .into_iter()
            .map(|dto| IdentifierEntry {
                user_id: dto.user_id,
                count: dto.count,
            })
            .collect::<Vec<_>>();

        let rows = join_participation(&observers, &identifiers, denylist);
        debug!(
            project_id,
            observers = observers.len(),
            identifiers = identifiers.len(),
            participants = rows.len(),
            "joined participation listings"
        );
        rows
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(
    rows: Vec<Value>,
    project_id: u64,
    kind: &'static str,
) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                warn!(project_id, kind, error = %error, "skipping undecodable listing row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    //! Join, denylist and listing decode coverage.

    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::domain::api_client::{ApiClientPorts, ClientPolicy};
    use crate::test_support::api::ScriptedObservationApi;
    use crate::test_support::clock::{MutableClock, RecordingSleeper};
    use crate::test_support::stores::InMemoryResponseCache;

    fn observer(user_id: u64, login: &str, observations: u64, species: u64) -> ObserverEntry {
        ObserverEntry {
            user_id,
            login: login.to_owned(),
            observation_count: observations,
            species_count: species,
        }
    }

    #[fixture]
    fn observers() -> Vec<ObserverEntry> {
        vec![
            observer(1, "diver", 40, 22),
            observer(2, "CEM", 90, 51),
            observer(3, "snorkeller", 5, 4),
        ]
    }

    #[rstest]
    fn missing_identifications_default_to_zero(observers: Vec<ObserverEntry>) {
        let identifiers = [
            IdentifierEntry { user_id: 1, count: 3 },
            IdentifierEntry { user_id: 1, count: 2 },
            IdentifierEntry { user_id: 99, count: 7 },
        ];

        let rows = join_participation(&observers, &identifiers, &Denylist::default());

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].identifications, 5);
        assert_eq!(rows[1].identifications, 0);
        assert_eq!(rows[2].identifications, 0);
    }

    #[rstest]
    #[case::exact(vec!["CEM"], vec!["diver", "snorkeller"])]
    #[case::case_sensitive(vec!["cem"], vec!["diver", "CEM", "snorkeller"])]
    #[case::several(vec!["CEM", "diver"], vec!["snorkeller"])]
    fn denylisted_logins_are_removed(
        observers: Vec<ObserverEntry>,
        #[case] denied: Vec<&str>,
        #[case] expected: Vec<&str>,
    ) {
        let denylist = denied.into_iter().collect::<Denylist>();
        let rows = join_participation(&observers, &[], &denylist);
        let logins = rows.iter().map(|row| row.participant.as_str()).collect::<Vec<_>>();
        assert_eq!(logins, expected);
    }

    #[rstest]
    fn empty_observers_yield_no_rows() {
        let identifiers = [IdentifierEntry { user_id: 1, count: 3 }];
        assert!(join_participation(&[], &identifiers, &Denylist::default()).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn fetches_and_joins_scoped_listings() {
        let api = Arc::new(ScriptedObservationApi::with_fallback(|query| {
            assert_eq!(query.param("quality_grade"), Some("research"));
            match query.endpoint() {
                Endpoint::Observers => Ok(json!({
                    "total_results": 3,
                    "results": [
                        { "user_id": 1, "user": { "login": "diver" }, "observation_count": 40, "species_count": 22 },
                        { "user_id": 2, "user": { "login": "CEM" }, "observation_count": 90, "species_count": 51 },
                        { "user_id": 3, "observation_count": 1 }
                    ]
                })),
                Endpoint::Identifiers => Ok(json!({
                    "total_results": 1,
                    "results": [{ "user_id": 1, "count": 6 }]
                })),
                _ => Ok(json!({ "total_results": 0 })),
            }
        }));
        let client = RateLimitedClient::new(
            ApiClientPorts::new(api, Arc::new(InMemoryResponseCache::default())),
            Arc::new(MutableClock::new(Utc::now())),
            Arc::new(RecordingSleeper::default()),
            ClientPolicy {
                min_request_interval: Duration::ZERO,
                ..ClientPolicy::default()
            },
        );
        let aggregator = ParticipationAggregator::new(Arc::new(client));

        let rows = aggregator
            .participation(417, Some("research"), &["CEM"].into_iter().collect::<Denylist>())
            .await;

        assert_eq!(
            rows,
            vec![ParticipantRow {
                participant: "diver".to_owned(),
                observations: 40,
                species: 22,
                identifications: 6,
            }]
        );
    }
}
