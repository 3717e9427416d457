// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider identity and stored OAuth credential models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// External data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    /// Apple Health export upload (no OAuth).
    Apple,
    /// Whoop, connected over OAuth 2.0.
    Whoop,
}

impl ProviderName {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderName::Apple => "apple",
            ProviderName::Whoop => "whoop",
        }
    }

    /// Whether data for this provider is pulled with an OAuth credential.
    pub const fn uses_oauth(self) -> bool {
        matches!(self, ProviderName::Whoop)
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a path or payload names a provider we do not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderName {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apple" => Ok(ProviderName::Apple),
            "whoop" => Ok(ProviderName::Whoop),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Identifies the single credential a user may hold for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub user_id: Uuid,
    pub provider: ProviderName,
}

impl CredentialKey {
    pub fn new(user_id: Uuid, provider: ProviderName) -> Self {
        Self { user_id, provider }
    }

    /// Document ID used by the persistent store.
    pub fn document_id(&self) -> String {
        format!("{}:{}", self.user_id, self.provider)
    }
}

/// Health of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[default]
    Active,
    /// The last refresh attempt was rejected by the provider. The next sync
    /// retries; the user sees a "reconnect provider" prompt meanwhile.
    Stale,
}

/// OAuth credential for one (user, provider) pair.
#[derive(Clone, PartialEq)]
pub struct ProviderCredential {
    pub user_id: Uuid,
    pub provider: ProviderName,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token expiry. `None` when the provider did not report one.
    pub expires_at: Option<DateTime<Utc>>,
    /// Space-separated scope actually granted.
    pub granted_scope: String,
    /// Stable user identifier on the provider side, if it could be looked up.
    pub provider_user_id: Option<String>,
    pub status: CredentialStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderCredential {
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(self.user_id, self.provider)
    }

    /// True when the access token is expired or will be within `margin`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at.is_some_and(|at| now + margin >= at)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.granted_scope.split_whitespace()
    }
}

// Tokens never reach log output.
impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("granted_scope", &self.granted_scope)
            .field("provider_user_id", &self.provider_user_id)
            .field("status", &self.status)
            .finish()
    }
}
