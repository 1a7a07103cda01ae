//! Shared HTTP client construction and upstream error decoding.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::SourceError;

/// Build a client with the configured request timeout.
pub fn build_client(timeout_secs: u64, accept_invalid_certs: bool) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| SourceError::Transport {
            message: format!("Failed to build HTTP client: {e}"),
        })
}

/// Best-effort message from an error response: the JSON `message` field when
/// present, otherwise the reason phrase followed by the raw body.
pub fn upstream_message(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = json.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    format!("{}{}", status.canonical_reason().unwrap_or_default(), body)
}

pub fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport {
        message: e.to_string(),
    }
}
