//! Reqwest-backed observation API adapter.
//!
//! This adapter owns transport details only: URL construction, the optional
//! `Authorization` header, timeout and HTTP error mapping, and JSON decoding.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::domain::ports::{ApiQuery, ObservationApi, ObservationApiError};

const USER_AGENT: &str = concat!("biodiversity-collector/", env!("CARGO_PKG_VERSION"));

/// Observation API adapter issuing GET requests below one base URL.
pub struct MinkaHttpSource {
    client: Client,
    base: Url,
    authorization: Option<String>,
}

impl MinkaHttpSource {
    /// Build an adapter using a reqwest client with an explicit request timeout.
    ///
    /// `authorization` is sent verbatim as the `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base: Url,
        timeout: Duration,
        authorization: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base: directory_url(base),
            authorization,
        })
    }

    fn request_url(&self, query: &ApiQuery) -> Result<Url, ObservationApiError> {
        let mut url = self
            .base
            .join(query.endpoint().path())
            .map_err(|error| ObservationApiError::rejected(format!("invalid endpoint URL: {error}")))?;
        url.query_pairs_mut().extend_pairs(query.params());
        Ok(url)
    }
}

/// Ensure the base path ends in `/` so endpoint paths are appended, not swapped in.
fn directory_url(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[async_trait]
impl ObservationApi for MinkaHttpSource {
    async fn fetch_json(&self, query: &ApiQuery) -> Result<Value, ObservationApiError> {
        let url = self.request_url(query)?;
        debug!(url = %url, "requesting observation API");
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(authorization) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization.as_str());
        }
        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        parse_document(body.as_ref())
    }
}

fn parse_document(body: &[u8]) -> Result<Value, ObservationApiError> {
    let document: Value = serde_json::from_slice(body).map_err(|error| {
        ObservationApiError::decode(format!("invalid API JSON payload: {error}"))
    })?;
    if document.is_object() {
        Ok(document)
    } else {
        Err(ObservationApiError::decode("API payload is not a JSON object"))
    }
}

fn map_transport_error(error: reqwest::Error) -> ObservationApiError {
    if error.is_timeout() {
        ObservationApiError::timeout(error.to_string())
    } else if error.is_decode() {
        ObservationApiError::decode(error.to_string())
    } else {
        ObservationApiError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> ObservationApiError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => ObservationApiError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ObservationApiError::timeout(message)
        }
        _ if status.is_client_error() => ObservationApiError::rejected(message),
        _ => ObservationApiError::server(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
