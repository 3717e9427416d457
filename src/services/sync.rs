// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pull provider data and feed it through the normalization pipeline.

use crate::error::AppError;
use crate::models::ProviderName;
use crate::services::http::ProviderApiError;
use crate::services::oauth::OAuthError;
use crate::services::pipeline::{IngestReport, NormalizationPipeline};
use crate::services::providers::ProviderRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Result of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub provider: ProviderName,
    pub since: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub ingest: IngestReport,
}

#[derive(Clone)]
pub struct SyncService {
    registry: ProviderRegistry,
    pipeline: NormalizationPipeline,
}

impl SyncService {
    pub fn new(registry: ProviderRegistry, pipeline: NormalizationPipeline) -> Self {
        Self { registry, pipeline }
    }

    pub async fn sync(
        &self,
        user_id: Uuid,
        provider: ProviderName,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, AppError> {
        match provider {
            ProviderName::Whoop => self.sync_whoop(user_id, since).await,
            // Apple data is pushed through import, never pulled
            ProviderName::Apple => Err(AppError::BadRequest(
                "apple data is imported, not synced".to_string(),
            )),
        }
    }

    /// Fetch Whoop workouts and sleeps since `since` and ingest them.
    ///
    /// A 401 from the data API triggers one forced refresh and a retry.
    pub async fn sync_whoop(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncReport, AppError> {
        let whoop = self
            .registry
            .whoop()
            .ok_or(OAuthError::UnsupportedProvider(ProviderName::Whoop))?;

        let token = whoop.engine.get_valid_access_token(user_id).await?;

        let payload = match whoop.client.fetch_payload(&token, since).await {
            Ok(payload) => payload,
            Err(ProviderApiError::Unauthorized) => {
                tracing::warn!(%user_id, "Whoop rejected access token, refreshing once");
                let token = match whoop.engine.force_refresh(user_id).await {
                    Ok(outcome) => outcome.credential.access_token,
                    // Someone else rotated it first; their token is current.
                    Err(OAuthError::StaleRefreshToken) => {
                        whoop.engine.get_valid_access_token(user_id).await?
                    }
                    Err(e) => return Err(e.into()),
                };
                whoop
                    .client
                    .fetch_payload(&token, since)
                    .await
                    .map_err(provider_error)?
            }
            Err(e) => return Err(provider_error(e)),
        };

        let ingest = self.pipeline.ingest(user_id, &whoop.handler, &payload).await?;

        tracing::info!(
            %user_id,
            provider = "whoop",
            inserted = ingest.inserted,
            merged = ingest.merged,
            rejected = ingest.rejected.len(),
            "Sync complete"
        );

        Ok(SyncReport {
            provider: ProviderName::Whoop,
            since,
            ingest,
        })
    }

    /// Ingest an uploaded Apple Health export.
    pub async fn import_apple(
        &self,
        user_id: Uuid,
        payload: &Value,
    ) -> Result<IngestReport, AppError> {
        self.pipeline
            .ingest(user_id, self.registry.apple(), payload)
            .await
    }
}

fn provider_error(err: ProviderApiError) -> AppError {
    match err {
        ProviderApiError::Timeout => AppError::OAuth(OAuthError::Timeout),
        other => AppError::ProviderApi(other.to_string()),
    }
}
