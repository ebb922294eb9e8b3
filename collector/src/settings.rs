//! Runtime settings loaded via OrthoConfig.
//!
//! Every knob has a default; the environment (`COLLECTOR_*`) or a config
//! file overrides it. Accessors validate values and translate them into the
//! domain's policy types.

use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

use crate::domain::{ClientPolicy, Error, SeriesSchedule};
use crate::outbound::minka::OAuthCredentials;

const DEFAULT_API_BASE_URL: &str = "https://api.minka-sdg.org/v1";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_TAXON_TREE_URL: &str = "https://raw.githubusercontent.com/eosc-cos4cloud/mecoda-orange/master/mecoda_orange/data/taxon_tree_with_marines.csv";

/// Collector configuration.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "COLLECTOR")]
pub struct CollectorSettings {
    /// Observation API base URL.
    pub api_base_url: Option<String>,
    /// Root directory for datasets and the taxon tree mirror.
    pub data_dir: Option<PathBuf>,
    /// Response cache directory; caching is off when unset.
    pub cache_dir: Option<PathBuf>,
    /// Lifetime of cached responses, in seconds.
    #[ortho_config(default = 1800)]
    pub cache_ttl_secs: u64,
    /// Minimum spacing between API requests, in milliseconds.
    #[ortho_config(default = 1000)]
    pub min_request_interval_ms: u64,
    /// Attempts per API request, including the first.
    #[ortho_config(default = 3)]
    pub max_attempts: u32,
    /// Base of the exponential retry backoff, in seconds.
    #[ortho_config(default = 2)]
    pub backoff_base: u32,
    /// Days per daily-series batch.
    #[ortho_config(default = 5)]
    pub batch_size: usize,
    /// Concurrent requests within a batch or listing.
    #[ortho_config(default = 3)]
    pub max_in_flight: usize,
    /// Pause between daily-series batches, in milliseconds.
    #[ortho_config(default = 500)]
    pub batch_pause_ms: u64,
    /// HTTP request timeout, in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// Listing page size.
    #[ortho_config(default = 500)]
    pub page_size: u32,
    /// Marine/terrestrial taxon tree CSV URL.
    pub taxon_tree_url: Option<String>,
    /// Static `Authorization` header value.
    pub api_token: Option<String>,
    /// OAuth token endpoint.
    pub oauth_token_url: Option<String>,
    /// OAuth client identifier.
    pub oauth_client_id: Option<String>,
    /// OAuth client secret.
    pub oauth_client_secret: Option<String>,
    /// OAuth account user name.
    pub oauth_username: Option<String>,
    /// OAuth account password.
    pub oauth_password: Option<String>,
    /// Emit JSON log lines; off when unset.
    pub log_json: Option<bool>,
}

/// How API requests are authenticated.
#[derive(Debug, Clone)]
pub enum Authentication {
    /// No `Authorization` header.
    Anonymous,
    /// A static header value.
    Token(String),
    /// A password-grant token requested at startup.
    OAuth(OAuthCredentials),
}

fn parse_url(raw: &str, setting: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|error| {
        Error::invalid_request(format!("{setting} is not a valid URL: {error}"))
    })
}

fn utf8_path(path: PathBuf, setting: &str) -> Result<Utf8PathBuf, Error> {
    Utf8PathBuf::from_path_buf(path).map_err(|path| {
        Error::invalid_request(format!("{setting} '{}' is not valid UTF-8", path.display()))
    })
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|value| value.trim()).filter(|value| !value.is_empty())
}

impl CollectorSettings {
    /// Whether log lines are emitted as JSON.
    pub fn log_json(&self) -> bool {
        self.log_json.unwrap_or(false)
    }

    /// Observation API base URL.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error for an unparsable URL.
    pub fn api_base_url(&self) -> Result<Url, Error> {
        parse_url(
            self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL),
            "api_base_url",
        )
    }

    /// Taxon tree CSV URL.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error for an unparsable URL.
    pub fn taxon_tree_url(&self) -> Result<Url, Error> {
        parse_url(
            self.taxon_tree_url
                .as_deref()
                .unwrap_or(DEFAULT_TAXON_TREE_URL),
            "taxon_tree_url",
        )
    }

    /// Dataset root directory.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error for a non-UTF-8 path.
    pub fn data_dir(&self) -> Result<Utf8PathBuf, Error> {
        utf8_path(
            self.data_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            "data_dir",
        )
    }

    /// Response cache directory, when caching is enabled.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error for a non-UTF-8 path.
    pub fn cache_dir(&self) -> Result<Option<Utf8PathBuf>, Error> {
        self.cache_dir
            .clone()
            .map(|path| utf8_path(path, "cache_dir"))
            .transpose()
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Client policy derived from the rate, retry and cache settings.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error when `max_attempts` or `page_size`
    /// is zero.
    pub fn client_policy(&self) -> Result<ClientPolicy, Error> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_request("max_attempts must be at least 1"));
        }
        let page_size = pagination::page_size(self.page_size)
            .map_err(|error| Error::invalid_request(format!("page_size: {error}")))?;
        Ok(ClientPolicy {
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            max_in_flight: self.max_in_flight.max(1),
            page_size,
        })
    }

    /// Daily-series batching.
    pub fn series_schedule(&self) -> SeriesSchedule {
        SeriesSchedule {
            batch_size: self.batch_size.max(1),
            max_in_flight: self.max_in_flight.max(1),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }

    /// Authentication mode.
    ///
    /// A static token wins over OAuth credentials.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error when only some OAuth fields are set
    /// or the token URL is invalid.
    pub fn authentication(&self) -> Result<Authentication, Error> {
        if let Some(token) = non_blank(self.api_token.as_ref()) {
            return Ok(Authentication::Token(token.to_owned()));
        }

        let fields = [
            ("oauth_token_url", non_blank(self.oauth_token_url.as_ref())),
            ("oauth_client_id", non_blank(self.oauth_client_id.as_ref())),
            (
                "oauth_client_secret",
                non_blank(self.oauth_client_secret.as_ref()),
            ),
            ("oauth_username", non_blank(self.oauth_username.as_ref())),
            ("oauth_password", non_blank(self.oauth_password.as_ref())),
        ];
        let missing = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect::<Vec<_>>();
        match (fields, missing.len()) {
            (_, 5) => Ok(Authentication::Anonymous),
            (
                [
                    (_, Some(token_url)),
                    (_, Some(client_id)),
                    (_, Some(client_secret)),
                    (_, Some(username)),
                    (_, Some(password)),
                ],
                0,
            ) => Ok(Authentication::OAuth(OAuthCredentials {
                token_url: parse_url(token_url, "oauth_token_url")?,
                client_id: client_id.to_owned(),
                client_secret: client_secret.to_owned(),
                username: username.to_owned(),
                password: password.to_owned(),
            })),
            _ => Err(Error::invalid_request(format!(
                "incomplete OAuth credentials; missing {}",
                missing.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings defaults, overrides and validation.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 10] = [
        "COLLECTOR_API_BASE_URL",
        "COLLECTOR_DATA_DIR",
        "COLLECTOR_CACHE_DIR",
        "COLLECTOR_CACHE_TTL_SECS",
        "COLLECTOR_MAX_ATTEMPTS",
        "COLLECTOR_PAGE_SIZE",
        "COLLECTOR_API_TOKEN",
        "COLLECTOR_OAUTH_TOKEN_URL",
        "COLLECTOR_OAUTH_CLIENT_ID",
        "COLLECTOR_LOG_JSON",
    ];

    const OAUTH_REST: [&str; 3] = [
        "COLLECTOR_OAUTH_CLIENT_SECRET",
        "COLLECTOR_OAUTH_USERNAME",
        "COLLECTOR_OAUTH_PASSWORD",
    ];

    fn cleared_with(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARS.iter()
            .chain(OAUTH_REST.iter())
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    fn load() -> CollectorSettings {
        CollectorSettings::load_from_iter([OsString::from("update-datasets")])
            .expect("config should load")
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(cleared_with(&[]));

        let settings = load();
        assert_eq!(
            settings.api_base_url().expect("url").as_str(),
            "https://api.minka-sdg.org/v1"
        );
        assert_eq!(settings.data_dir().expect("dir"), Utf8PathBuf::from("data"));
        assert!(settings.cache_dir().expect("dir").is_none());
        assert_eq!(settings.client_policy().expect("policy"), ClientPolicy::default());
        assert_eq!(settings.series_schedule(), SeriesSchedule::default());
        assert!(matches!(
            settings.authentication().expect("auth"),
            Authentication::Anonymous
        ));
        assert!(!settings.log_json());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(cleared_with(&[
            ("COLLECTOR_DATA_DIR", "/srv/datasets"),
            ("COLLECTOR_CACHE_DIR", "/var/cache/collector"),
            ("COLLECTOR_CACHE_TTL_SECS", "60"),
            ("COLLECTOR_MAX_ATTEMPTS", "5"),
            ("COLLECTOR_API_TOKEN", "secret-token"),
            ("COLLECTOR_LOG_JSON", "true"),
        ]));

        let settings = load();
        let policy = settings.client_policy().expect("policy");
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.cache_ttl, Duration::from_secs(60));
        assert_eq!(
            settings.cache_dir().expect("dir"),
            Some(Utf8PathBuf::from("/var/cache/collector"))
        );
        assert!(matches!(
            settings.authentication().expect("auth"),
            Authentication::Token(token) if token == "secret-token"
        ));
        assert!(settings.log_json());
    }

    #[rstest]
    #[case::enabled("true", true)]
    #[case::disabled("false", false)]
    fn json_logging_follows_the_environment(#[case] raw: &str, #[case] expected: bool) {
        let _guard = lock_env(cleared_with(&[("COLLECTOR_LOG_JSON", raw)]));

        assert_eq!(load().log_json(), expected);
    }

    #[rstest]
    fn zero_page_size_is_rejected() {
        let _guard = lock_env(cleared_with(&[("COLLECTOR_PAGE_SIZE", "0")]));

        let error = load().client_policy().expect_err("zero page size");
        assert!(error.message().contains("page_size"));
    }

    #[rstest]
    fn partial_oauth_credentials_are_rejected() {
        let _guard = lock_env(cleared_with(&[
            ("COLLECTOR_OAUTH_TOKEN_URL", "https://www.minka-sdg.org/oauth/token"),
            ("COLLECTOR_OAUTH_CLIENT_ID", "collector"),
        ]));

        let error = load().authentication().expect_err("incomplete");
        assert!(error.message().contains("oauth_client_secret"));
        assert!(error.message().contains("oauth_password"));
    }

    #[rstest]
    fn complete_oauth_credentials_select_password_grant() {
        let _guard = lock_env(cleared_with(&[
            ("COLLECTOR_OAUTH_TOKEN_URL", "https://www.minka-sdg.org/oauth/token"),
            ("COLLECTOR_OAUTH_CLIENT_ID", "collector"),
            ("COLLECTOR_OAUTH_CLIENT_SECRET", "s3cret"),
            ("COLLECTOR_OAUTH_USERNAME", "ops@example.org"),
            ("COLLECTOR_OAUTH_PASSWORD", "hunter2"),
        ]));

        let Authentication::OAuth(credentials) = load().authentication().expect("auth") else {
            panic!("expected OAuth credentials");
        };
        assert_eq!(credentials.username, "ops@example.org");
    }
}
