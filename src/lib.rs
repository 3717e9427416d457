// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Wearables-Sync: connect fitness wearables and keep one canonical
//! record of workouts and sleep per user.
//!
//! Providers are connected over OAuth 2.0 (Whoop) or by uploading an
//! export (Apple Health). Provider payloads are normalized into
//! [`models::HealthRecord`]s and merged so that overlapping observations
//! of the same event collapse into one record.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use dashmap::DashMap;
use db::{CredentialStore, HealthRecordStore};
use services::{
    AppleHandler, HealthRecordService, MergePolicy, NormalizationPipeline, ProviderRegistry,
    SyncService, WhoopIntegration,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: ProviderRegistry,
    pub records: HealthRecordService,
    pub sync: SyncService,
}

impl AppState {
    /// Wire providers and services on top of the given stores.
    ///
    /// The token cache and refresh locks are shared by every OAuth engine
    /// within this process.
    pub fn new(
        config: Config,
        credentials: Arc<dyn CredentialStore>,
        records: Arc<dyn HealthRecordStore>,
        http: reqwest::Client,
    ) -> Self {
        let policy = MergePolicy::from_secs(config.merge_tolerance_secs);
        let token_cache = Arc::new(DashMap::new());
        let refresh_locks = Arc::new(DashMap::new());

        let whoop = config.whoop.as_ref().map(|settings| {
            WhoopIntegration::new(
                settings,
                credentials.clone(),
                http.clone(),
                config.oauth_state_key.clone(),
                policy,
                token_cache.clone(),
                refresh_locks.clone(),
            )
        });
        if whoop.is_none() {
            tracing::warn!("WHOOP_CLIENT_ID not set, Whoop integration disabled");
        }

        let registry = ProviderRegistry::new(whoop, AppleHandler::new(policy));
        let pipeline = NormalizationPipeline::new(records.clone());

        Self {
            config,
            records: HealthRecordService::new(records),
            sync: SyncService::new(registry.clone(), pipeline),
            registry,
        }
    }
}
