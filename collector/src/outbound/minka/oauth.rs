//! OAuth password-grant token request.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Resource-owner credentials for the password grant.
#[derive(Clone)]
pub struct OAuthCredentials {
    /// Token endpoint.
    pub token_url: Url,
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Account user name (e-mail).
    pub username: String,
    /// Account password.
    pub password: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponseDto {
    access_token: Option<String>,
}

/// Request an access token, returning a ready `Authorization` header value.
///
/// Connection timeouts are retried up to three attempts. Any other failure,
/// or a response without `access_token`, logs a warning and yields `None` so
/// the run can continue unauthenticated.
pub async fn request_access_token(
    credentials: &OAuthCredentials,
    timeout: Duration,
) -> Option<String> {
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(error) => {
            warn!(error = %error, "failed to build OAuth client");
            return None;
        }
    };
    let form = [
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("grant_type", "password"),
        ("username", credentials.username.as_str()),
        ("password", credentials.password.as_str()),
    ];

    for attempt in 1..=MAX_ATTEMPTS {
        let outcome = client
            .post(credentials.token_url.clone())
            .form(&form)
            .send()
            .await;
        let response = match outcome {
            Ok(response) => response,
            Err(error) if error.is_connect() || error.is_timeout() => {
                warn!(attempt, max_attempts = MAX_ATTEMPTS, error = %error, "OAuth token request timed out");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                continue;
            }
            Err(error) => {
                warn!(error = %error, "OAuth token request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "OAuth token request rejected");
            return None;
        }
        return match response.json::<TokenResponseDto>().await {
            Ok(TokenResponseDto {
                access_token: Some(token),
            }) => {
                info!("OAuth access token obtained");
                Some(bearer(&token))
            }
            Ok(_) => {
                warn!("OAuth response carried no access token");
                None
            }
            Err(error) => {
                warn!(error = %error, "OAuth response could not be decoded");
                None
            }
        };
    }

    warn!("OAuth token request attempts exhausted");
    None
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_sent_as_bearer_credentials() {
        assert_eq!(bearer("abc123"), "Bearer abc123");
    }

    #[test]
    fn debug_output_omits_secrets() {
        let credentials = OAuthCredentials {
            token_url: Url::parse("https://www.minka-sdg.org/oauth/token").expect("url"),
            client_id: "collector".to_owned(),
            client_secret: "s3cret".to_owned(),
            username: "ops@example.org".to_owned(),
            password: "hunter2".to_owned(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("hunter2"));
    }
}
