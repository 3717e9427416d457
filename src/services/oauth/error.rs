// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use crate::error::AppError;
use crate::models::{CredentialKey, ProviderName};

/// Failures of the OAuth credential lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    /// The provider refused the authorization code, or answered with
    /// something that is not a token response.
    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),

    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    /// Refresh was rejected; the credential is now marked stale.
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// The presented refresh token was already rotated by a concurrent
    /// refresh. The caller should re-read the stored credential.
    #[error("Refresh token already rotated by a concurrent refresh")]
    StaleRefreshToken,

    #[error("Provider did not respond in time")]
    Timeout,

    #[error("No {} credential for user {}", .0.provider, .0.user_id)]
    NotConnected(CredentialKey),

    #[error("Provider {0} is not configured for OAuth")]
    UnsupportedProvider(ProviderName),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OAuthError {
    /// Transient failures worth retrying without user involvement.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OAuthError::Timeout | OAuthError::StaleRefreshToken)
    }

    /// Failures that leave the user needing to reconnect the provider.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, OAuthError::Refresh(_) | OAuthError::NotConnected(_))
    }
}

impl From<AppError> for OAuthError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::OAuth(inner) => inner,
            other => OAuthError::Store(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for OAuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        OAuthError::Internal(format!("OAuth task aborted: {err}"))
    }
}
