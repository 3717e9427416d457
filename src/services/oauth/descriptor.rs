// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Static per-provider OAuth configuration.

use crate::models::ProviderName;
use std::collections::BTreeSet;
use std::fmt;

/// Where client credentials go on token endpoint requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// `client_id` / `client_secret` form fields.
    RequestBody,
    /// HTTP Basic `Authorization` header.
    BasicHeader,
}

/// Endpoints, client credentials and protocol flags for one provider.
///
/// Built once from [`crate::config::Config`] and never mutated.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub provider: ProviderName,
    pub authorize_url: String,
    pub token_url: String,
    /// RFC 7009 revocation endpoint, if the provider has one.
    pub revoke_url: Option<String>,
    pub api_base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Space-separated scope requested when the caller asks for none.
    pub default_scope: String,
    pub use_pkce: bool,
    pub client_auth: ClientAuthMethod,
}

impl ProviderDescriptor {
    /// Attach client credentials to a token endpoint request.
    pub fn authenticate(
        &self,
        builder: reqwest::RequestBuilder,
        params: &mut Vec<(&'static str, String)>,
    ) -> reqwest::RequestBuilder {
        match self.client_auth {
            ClientAuthMethod::RequestBody => {
                params.push(("client_id", self.client_id.clone()));
                params.push(("client_secret", self.client_secret.clone()));
                builder
            }
            ClientAuthMethod::BasicHeader => {
                builder.basic_auth(&self.client_id, Some(&self.client_secret))
            }
        }
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("provider", &self.provider)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("default_scope", &self.default_scope)
            .field("use_pkce", &self.use_pkce)
            .field("client_auth", &self.client_auth)
            .finish()
    }
}

/// Union of the requested scope and the provider's mandatory scope,
/// deduplicated and sorted so the result is deterministic.
pub fn merge_scopes(requested: &str, mandatory: &[&str]) -> String {
    let mut scopes: BTreeSet<&str> = requested.split_whitespace().collect();
    scopes.extend(mandatory.iter().copied().filter(|s| !s.is_empty()));
    scopes.into_iter().collect::<Vec<_>>().join(" ")
}
