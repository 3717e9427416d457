// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth connect routes: authorize URL issuance and provider callback.

use crate::error::{AppError, Result};
use crate::models::ProviderName;
use crate::services::oauth::{AuthorizationRequest, OAuthError};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Authorization URL issuance. Names the user, so it sits behind the API key.
pub fn authorize_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/oauth/{provider}/authorize", get(authorize))
}

/// Provider redirect target, reached by the user's browser.
pub fn callback_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/oauth/{provider}/callback", get(callback))
}

pub(crate) fn parse_provider(raw: &str) -> Result<ProviderName> {
    raw.parse()
        .map_err(|e: crate::models::UnknownProvider| AppError::NotFound(e.to_string()))
}

#[derive(Deserialize)]
struct AuthorizeParams {
    user_id: Uuid,
    /// Where to send the user after the callback; defaults to the frontend.
    redirect_uri: Option<String>,
    /// Space-separated scope; the provider's mandatory scope is always added.
    scope: Option<String>,
}

/// Issue an authorization URL for the frontend to open.
async fn authorize(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Json<AuthorizationRequest>> {
    let provider = parse_provider(&provider)?;
    let engine = state.registry.oauth(provider)?;

    // Only our own frontend may be a post-callback destination.
    if let Some(redirect) = &params.redirect_uri {
        if !redirect.starts_with(&state.config.frontend_url) {
            return Err(AppError::BadRequest(
                "redirect_uri must point at the frontend".to_string(),
            ));
        }
    }

    let request =
        engine.initiate_authorization(params.user_id, params.scope.as_deref(), params.redirect_uri)?;

    Ok(Json(request))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Provider redirect target. Always ends in a redirect to the frontend,
/// with `success=true` or an `error` code.
async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let provider = parse_provider(&provider)?;
    let engine = state.registry.oauth(provider)?;
    let frontend_url = state.config.frontend_url.as_str();

    // User denied consent or the provider reported a failure
    if let Some(error) = params.error {
        tracing::warn!(%provider, error = %error, "OAuth error from provider");
        return Ok(redirect_with(frontend_url, provider, Err(error.as_str())));
    }

    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Ok(redirect_with(frontend_url, provider, Err("missing_code")));
    };

    tracing::info!(%provider, "Exchanging authorization code for tokens");

    match engine.exchange_code(&code, &oauth_state).await {
        Ok(outcome) => {
            let target = outcome.redirect_uri.as_deref().unwrap_or(frontend_url);
            Ok(redirect_with(target, provider, Ok(())))
        }
        Err(e) => {
            tracing::warn!(%provider, error = %e, "OAuth callback failed");
            Ok(redirect_with(frontend_url, provider, Err(callback_error_code(&e))))
        }
    }
}

fn callback_error_code(err: &OAuthError) -> &'static str {
    match err {
        OAuthError::InvalidState(_) => "invalid_state",
        OAuthError::Exchange(_) => "oauth_exchange_failed",
        OAuthError::Timeout => "provider_timeout",
        _ => "oauth_failed",
    }
}

fn redirect_with(base: &str, provider: ProviderName, outcome: std::result::Result<(), &str>) -> Redirect {
    let separator = if base.contains('?') { '&' } else { '?' };
    let query = match outcome {
        Ok(()) => format!("success=true&provider={}", provider),
        Err(code) => format!("error={}&provider={}", urlencoding::encode(code), provider),
    };
    Redirect::temporary(&format!("{}{}{}", base, separator, query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn location(redirect: Redirect) -> String {
        let response = redirect.into_response();
        response
            .headers()
            .get("location")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_redirect_success() {
        let url = location(redirect_with("http://app", ProviderName::Whoop, Ok(())));
        assert_eq!(url, "http://app?success=true&provider=whoop");
    }

    #[test]
    fn test_redirect_error_appends_to_existing_query() {
        let url = location(redirect_with(
            "http://app/connect?tab=1",
            ProviderName::Whoop,
            Err("access denied"),
        ));
        assert_eq!(url, "http://app/connect?tab=1&error=access%20denied&provider=whoop");
    }
}
