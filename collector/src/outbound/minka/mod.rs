//! Minka (iNaturalist-compatible) API adapters.
//!
//! This module provides the reqwest implementation of the `ObservationApi`
//! port and the OAuth password-grant token request used to authenticate it.

mod http_source;
mod oauth;

pub use http_source::MinkaHttpSource;
pub use oauth::{OAuthCredentials, request_access_token};
