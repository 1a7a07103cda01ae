//! OAuth client-credentials token exchange for the lakehouse workspace.
//!
//! The service principal's client id and secret are resolved from the secret
//! store immediately before the exchange and dropped afterwards.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;
use crate::http;

/// Short-lived bearer token.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint of a workspace host.
pub fn token_url(host_url: &str) -> String {
    format!("{}/oidc/v1/token", host_url.trim_end_matches('/'))
}

/// Exchange client credentials for a workspace-wide access token.
///
/// Credentials travel as HTTP Basic auth; the form asks for the `all-apis` scope.
pub async fn client_credentials_token(
    client: &reqwest::Client,
    host_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<AccessToken, SourceError> {
    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("{client_id}:{client_secret}").as_bytes());
    let body = format!(
        "grant_type={}&scope={}",
        urlencoding::encode("client_credentials"),
        urlencoding::encode("all-apis"),
    );

    debug!(host = %host_url, "Requesting client credentials token");

    let response = client
        .post(token_url(host_url))
        .header("Authorization", format!("Basic {basic}"))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|e| SourceError::Auth {
            host: host_url.to_string(),
            message: format!("Client credentials request failed: {e}"),
        })?;

    let status = response.status();
    let body_text = response.text().await.map_err(|e| SourceError::Auth {
        host: host_url.to_string(),
        message: format!("Failed to read token response: {e}"),
    })?;

    if !status.is_success() {
        return Err(SourceError::Auth {
            host: host_url.to_string(),
            message: format!(
                "Token request failed (HTTP {}): {}",
                status.as_u16(),
                http::upstream_message(status, &body_text)
            ),
        });
    }

    parse_token_response(host_url, &body_text)
}

fn parse_token_response(host_url: &str, body: &str) -> Result<AccessToken, SourceError> {
    let auth_error = |message: String| SourceError::Auth {
        host: host_url.to_string(),
        message,
    };
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| auth_error(format!("Invalid JSON in token response: {e}")))?;

    let access_token = json["access_token"]
        .as_str()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| auth_error("Token response missing 'access_token'".to_string()))?
        .to_string();
    let token_type = json["token_type"].as_str().unwrap_or("Bearer").to_string();
    let expires_at = json["expires_in"]
        .as_u64()
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));

    Ok(AccessToken {
        access_token,
        token_type,
        expires_at,
    })
}
