// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Whoop: OAuth hooks, data API client and payload normalization.

mod client;
mod normalize;
mod oauth;

pub use client::WhoopClient;
pub use normalize::{sport_name, WhoopHandler};
pub use oauth::{WhoopOAuth, WHOOP_REQUIRED_SCOPE};

use crate::config::WhoopSettings;
use crate::db::CredentialStore;
use crate::services::oauth::{OAuthEngine, RefreshLocks, TokenCache};
use crate::services::pipeline::MergePolicy;
use std::sync::Arc;

/// Everything needed to connect and sync Whoop accounts.
#[derive(Clone)]
pub struct WhoopIntegration {
    pub engine: OAuthEngine,
    pub client: WhoopClient,
    pub handler: WhoopHandler,
}

impl WhoopIntegration {
    pub fn new(
        settings: &WhoopSettings,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
        state_key: Vec<u8>,
        policy: MergePolicy,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        let engine = OAuthEngine::new(
            Arc::new(WhoopOAuth::new(settings)),
            store,
            http.clone(),
            state_key,
            token_cache,
            refresh_locks,
        );

        Self {
            engine,
            client: WhoopClient::new(http, &settings.api_base_url),
            handler: WhoopHandler::new(policy),
        }
    }
}
