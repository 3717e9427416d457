// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Whoop OAuth quirks.
//!
//! - `offline` must be in the scope or Whoop issues no refresh token.
//! - Refresh tokens are single-use; the rotated one must be stored at once.
//! - Refresh requests must repeat the scope or Whoop narrows the grant.
//! - Client credentials go in the form body.

use crate::config::WhoopSettings;
use crate::models::{ProviderCredential, ProviderName};
use crate::services::http::{check_response, check_response_json, ProviderApiError};
use crate::services::oauth::{
    merge_scopes, ClientAuthMethod, ProviderDescriptor, ProviderOAuth, TokenRequest,
};
use async_trait::async_trait;
use serde_json::Value;

/// Scope needed for full data access.
pub const WHOOP_REQUIRED_SCOPE: &str =
    "offline read:cycles read:sleep read:recovery read:workout read:profile read:body_measurement";

const OFFLINE_SCOPE: &[&str] = &["offline"];

pub struct WhoopOAuth {
    descriptor: ProviderDescriptor,
}

impl WhoopOAuth {
    pub fn new(settings: &WhoopSettings) -> Self {
        let configured = settings
            .default_scope
            .as_deref()
            .unwrap_or(WHOOP_REQUIRED_SCOPE);
        let oauth_base = settings.oauth_base_url.trim_end_matches('/');

        Self {
            descriptor: ProviderDescriptor {
                provider: ProviderName::Whoop,
                authorize_url: format!("{}/auth", oauth_base),
                token_url: format!("{}/token", oauth_base),
                revoke_url: None,
                api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                redirect_uri: settings.redirect_uri.clone(),
                default_scope: merge_scopes(configured, OFFLINE_SCOPE),
                use_pkce: false,
                client_auth: ClientAuthMethod::RequestBody,
            },
        }
    }
}

#[async_trait]
impl ProviderOAuth for WhoopOAuth {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn mandatory_scope(&self) -> &'static [&'static str] {
        OFFLINE_SCOPE
    }

    fn prepare_refresh_request(&self, refresh_token: &str, _granted_scope: &str) -> TokenRequest {
        TokenRequest::refresh(refresh_token).with("scope", self.descriptor.default_scope.clone())
    }

    /// GET /v2/user/profile/basic → `user_id`.
    async fn fetch_identity(
        &self,
        http: &reqwest::Client,
        access_token: &str,
    ) -> Result<Option<String>, ProviderApiError> {
        let url = format!("{}/v2/user/profile/basic", self.descriptor.api_base_url);
        let response = http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(ProviderApiError::from_transport)?;

        let profile: Value = check_response_json(response).await?;
        match profile.get("user_id") {
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
            _ => Err(ProviderApiError::Decode(
                "profile response has no user_id".to_string(),
            )),
        }
    }

    /// DELETE /v2/user/access revokes the grant for this access token.
    async fn revoke_remote(
        &self,
        http: &reqwest::Client,
        credential: &ProviderCredential,
    ) -> Result<(), ProviderApiError> {
        let url = format!("{}/v2/user/access", self.descriptor.api_base_url);
        let response = http
            .delete(&url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(ProviderApiError::from_transport)?;

        check_response(response).await?;
        tracing::info!(user_id = %credential.user_id, "Whoop access revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn whoop() -> WhoopOAuth {
        WhoopOAuth::new(&Config::test_default().whoop.unwrap())
    }

    #[test]
    fn test_default_scope_always_has_offline() {
        let mut settings = Config::test_default().whoop.unwrap();
        settings.default_scope = Some("read:workout read:sleep".to_string());
        let oauth = WhoopOAuth::new(&settings);

        assert_eq!(
            oauth.descriptor().default_scope,
            "offline read:sleep read:workout"
        );
    }

    #[test]
    fn test_refresh_request_echoes_scope() {
        let oauth = whoop();
        let request = oauth.prepare_refresh_request("rt-1", "read:workout");

        assert_eq!(request.param("grant_type"), Some("refresh_token"));
        assert_eq!(request.param("refresh_token"), Some("rt-1"));
        let scope = request.param("scope").unwrap();
        assert!(scope.split(' ').any(|s| s == "offline"));
        assert_eq!(scope, oauth.descriptor().default_scope);
    }

    #[test]
    fn test_endpoints_and_transmission() {
        let oauth = whoop();
        let d = oauth.descriptor();
        assert_eq!(d.token_url, "https://api.prod.whoop.com/oauth/oauth2/token");
        assert_eq!(d.authorize_url, "https://api.prod.whoop.com/oauth/oauth2/auth");
        assert_eq!(d.client_auth, ClientAuthMethod::RequestBody);
        assert!(!d.use_pkce);
    }
}
