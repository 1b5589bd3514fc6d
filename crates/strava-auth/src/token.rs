//! OAuth token refresh
//!
//! POSTs the client credentials and the current refresh token to the
//! provider's token endpoint and returns the freshly minted token pair.
//! Strava rotates refresh tokens, so the response's `refresh_token` replaces
//! the one that was sent.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::REFRESH_GRANT_TYPE;
use crate::credentials::CredentialSet;
use crate::error::{Error, Result};

/// Successful response from the token endpoint.
///
/// `expires_at` is absolute (unix seconds). `expires_in` and `token_type`
/// are informational; only the first three fields are required.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Exchange the refresh token in `credentials` for a new token pair.
///
/// Only HTTP 200 with a well-formed token body counts as success. Any other
/// status, or a 200 whose body is not a token response, is returned as
/// `Error::TokenRefresh` with the status code and response body; failures
/// below HTTP (connect, timeout, truncated body) are `Error::Network`.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &str,
    credentials: &CredentialSet,
) -> Result<TokenResponse> {
    let client_id = credentials.client_id.to_string();
    let response = client
        .post(endpoint)
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", credentials.client_secret.expose().as_str()),
            ("refresh_token", credentials.refresh_token.expose().as_str()),
            ("grant_type", REFRESH_GRANT_TYPE),
        ])
        .send()
        .await
        .map_err(|e| Error::Network(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Network(format!("reading token refresh response: {e}")))?;

    if status != StatusCode::OK {
        return Err(Error::TokenRefresh {
            status: status.as_u16(),
            body,
        });
    }

    match serde_json::from_str::<TokenResponse>(&body) {
        Ok(token) => Ok(token),
        Err(e) => {
            warn!(error = %e, "token endpoint returned 200 with an unreadable body");
            Err(Error::TokenRefresh {
                status: status.as_u16(),
                body,
            })
        }
    }
}
