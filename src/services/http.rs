// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared HTTP plumbing for provider calls.
//!
//! Every outbound provider request goes through a client built here, so all
//! of them carry the same timeout and the same status classification.

use serde::de::DeserializeOwned;
use std::time::Duration;

/// Upper bound for any single provider HTTP call.
pub const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body we keep in an error message.
const BODY_PREVIEW_LIMIT: usize = 256;

/// Build the HTTP client used for provider OAuth and data APIs.
pub fn provider_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(PROVIDER_HTTP_TIMEOUT)
        .user_agent(concat!("wearables-sync/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Classified failure of a provider HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderApiError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider rate limit hit (429)")]
    RateLimited,

    #[error("provider rejected the access token (401)")]
    Unauthorized,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderApiError {
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderApiError::Timeout
        } else {
            ProviderApiError::Transport(err.to_string())
        }
    }

    /// Transient failures the sync scheduler should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderApiError::Timeout | ProviderApiError::RateLimited | ProviderApiError::Transport(_)
        ) || matches!(self, ProviderApiError::Status { status, .. } if *status >= 500)
    }

    /// OAuth `invalid_grant`: the refresh token was already consumed or revoked.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, ProviderApiError::Status { body, .. } if body.contains("invalid_grant"))
    }
}

/// Check response status and return error if not successful.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ProviderApiError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    // Rate limit - the sync scheduler retries later
    if status.as_u16() == 429 {
        tracing::warn!("Provider rate limit hit (429)");
        return Err(ProviderApiError::RateLimited);
    }

    // Unauthorized - token may be expired or revoked
    if status.as_u16() == 401 {
        return Err(ProviderApiError::Unauthorized);
    }

    Err(ProviderApiError::Status {
        status: status.as_u16(),
        body: preview(&body),
    })
}

/// Check response and parse JSON body.
pub async fn check_response_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderApiError> {
    let response = check_response(response).await?;
    response.json().await.map_err(|e| {
        if e.is_timeout() {
            ProviderApiError::Timeout
        } else {
            ProviderApiError::Decode(e.to_string())
        }
    })
}

fn preview(body: &str) -> String {
    if body.len() <= BODY_PREVIEW_LIMIT {
        return body.to_string();
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
