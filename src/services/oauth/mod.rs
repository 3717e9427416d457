// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider-agnostic OAuth 2.0 credential lifecycle.
//!
//! [`OAuthEngine`] owns the fixed sequence of every flow (authorize,
//! exchange, refresh, revoke). Providers plug in through the
//! [`ProviderOAuth`] hooks and never re-implement the orchestration.

mod descriptor;
mod engine;
mod error;
pub mod pkce;
pub mod state;

pub use descriptor::{merge_scopes, ClientAuthMethod, ProviderDescriptor};
pub use engine::{OAuthEngine, RefreshLocks, TokenCache};
pub use error::OAuthError;

use crate::models::ProviderCredential;
use crate::services::http::{check_response, ProviderApiError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Form parameters for a token endpoint request, before client auth.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRequest {
    params: Vec<(&'static str, String)>,
}

impl TokenRequest {
    pub fn authorization_code(code: &str, redirect_uri: &str) -> Self {
        Self {
            params: vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.to_string()),
                ("redirect_uri", redirect_uri.to_string()),
            ],
        }
    }

    pub fn refresh(refresh_token: &str) -> Self {
        Self {
            params: vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.to_string()),
            ],
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn into_params(self) -> Vec<(&'static str, String)> {
        self.params
    }
}

// Values are codes and tokens; only the keys are printed.
impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.params.iter().map(|(k, _)| k))
            .finish()
    }
}

/// Token endpoint response (RFC 6749 section 5.1).
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }
}

/// Provider-side account identifier lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderIdentity {
    Known(String),
    /// Lookup failed or the provider has no identity endpoint.
    Unavailable,
}

impl ProviderIdentity {
    pub fn into_option(self) -> Option<String> {
        match self {
            ProviderIdentity::Known(id) => Some(id),
            ProviderIdentity::Unavailable => None,
        }
    }
}

/// Outcome of reading back a freshly persisted refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Stored token prefix matches the one the provider issued.
    Passed,
    /// The store did not keep what was written. Logged, never raised.
    Mismatch {
        stored_prefix: String,
        expected_prefix: String,
    },
    /// Provider issued no new refresh token; nothing to verify.
    Skipped,
    /// Read-back itself failed.
    Unavailable(String),
}

/// Connection lifecycle for one (user, provider) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthState {
    Unauthorized,
    Authorizing,
    Authorized,
    Refreshing,
    Expired,
    Revoked,
}

impl OAuthState {
    pub fn can_transition_to(self, next: OAuthState) -> bool {
        use OAuthState::*;
        matches!(
            (self, next),
            (Unauthorized, Authorizing)
                | (Authorizing, Authorized)
                | (Authorizing, Unauthorized)
                | (Authorized, Refreshing)
                | (Authorized, Authorizing)
                | (Authorized, Revoked)
                | (Refreshing, Authorized)
                | (Refreshing, Expired)
                | (Expired, Refreshing)
                | (Expired, Authorizing)
                | (Expired, Revoked)
                | (Revoked, Authorizing)
        )
    }
}

/// Authorization URL handed to the user agent.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
    pub scope: String,
}

/// Result of a successful code exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub credential: ProviderCredential,
    /// Where the user agent asked to land after the callback.
    pub redirect_uri: Option<String>,
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub credential: ProviderCredential,
    pub verification: Verification,
}

/// Per-provider variations on the OAuth lifecycle.
///
/// Everything not covered by a hook is fixed by [`OAuthEngine`].
#[async_trait]
pub trait ProviderOAuth: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Scopes added to every authorization request.
    fn mandatory_scope(&self) -> &'static [&'static str] {
        &[]
    }

    /// Build the refresh grant. `granted_scope` is the scope stored on the
    /// credential being refreshed.
    fn prepare_refresh_request(&self, refresh_token: &str, _granted_scope: &str) -> TokenRequest {
        TokenRequest::refresh(refresh_token)
    }

    /// Look up the provider-side user ID. `Ok(None)` when the provider has
    /// no identity endpoint.
    async fn fetch_identity(
        &self,
        _http: &reqwest::Client,
        _access_token: &str,
    ) -> Result<Option<String>, ProviderApiError> {
        Ok(None)
    }

    /// Revoke the grant on the provider side. Defaults to RFC 7009 against
    /// the descriptor's revocation endpoint, if any.
    async fn revoke_remote(
        &self,
        http: &reqwest::Client,
        credential: &ProviderCredential,
    ) -> Result<(), ProviderApiError> {
        let descriptor = self.descriptor();
        let Some(url) = descriptor.revoke_url.as_deref() else {
            return Ok(());
        };

        let mut params = match credential.refresh_token.as_deref() {
            Some(token) => vec![
                ("token", token.to_string()),
                ("token_type_hint", "refresh_token".to_string()),
            ],
            None => vec![
                ("token", credential.access_token.clone()),
                ("token_type_hint", "access_token".to_string()),
            ],
        };
        let builder = descriptor.authenticate(http.post(url), &mut params);
        let response = builder
            .form(&params)
            .send()
            .await
            .map_err(ProviderApiError::from_transport)?;
        check_response(response).await?;
        Ok(())
    }
}
