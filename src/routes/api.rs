// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user API routes. The API key middleware is applied in routes/mod.rs.

use super::oauth::parse_provider;
use crate::error::{AppError, Result};
use crate::models::{HealthRecordQuery, HealthRecordResponse, ProviderName};
use crate::services::oauth::{OAuthError, OAuthState};
use crate::services::{IngestReport, SyncReport};
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use uuid::Uuid;

/// Health exports are much larger than axum's 2 MB default.
const IMPORT_BODY_LIMIT: usize = 32 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/v1/users/{user_id}/connections/{provider}",
            get(get_connection).delete(delete_connection),
        )
        .route("/api/v1/users/{user_id}/sync/{provider}", post(sync_provider))
        .route(
            "/api/v1/users/{user_id}/import/apple",
            post(import_apple).layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT)),
        )
        .route("/api/v1/users/{user_id}/records", get(get_records))
        .route("/api/v1/users/{user_id}/workouts", get(get_workouts))
}

// ─── Connections ─────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectionResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub provider: ProviderName,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub state: OAuthState,
    pub provider_user_id: Option<String>,
    pub granted_scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

async fn get_connection(
    State(state): State<Arc<AppState>>,
    Path((user_id, provider)): Path<(Uuid, String)>,
) -> Result<Json<ConnectionResponse>> {
    let provider = parse_provider(&provider)?;
    let engine = state.registry.oauth(provider)?;

    let connection_state = engine.connection_state(user_id).await?;
    let credential = engine.credential(user_id).await?;

    Ok(Json(ConnectionResponse {
        provider,
        state: connection_state,
        provider_user_id: credential.as_ref().and_then(|c| c.provider_user_id.clone()),
        granted_scope: credential.as_ref().map(|c| c.granted_scope.clone()),
        expires_at: credential.and_then(|c| c.expires_at),
    }))
}

/// Disconnect a provider. Stored health records are kept.
async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path((user_id, provider)): Path<(Uuid, String)>,
) -> Result<StatusCode> {
    let provider = parse_provider(&provider)?;
    let engine = state.registry.oauth(provider)?;

    tracing::info!(%user_id, %provider, "User-initiated disconnect");

    if engine.revoke(user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(OAuthError::NotConnected(crate::models::CredentialKey::new(user_id, provider)).into())
    }
}

// ─── Sync & Import ───────────────────────────────────────────

#[derive(Deserialize)]
struct SyncParams {
    /// Only fetch records starting at or after this instant.
    since: Option<DateTime<Utc>>,
}

async fn sync_provider(
    State(state): State<Arc<AppState>>,
    Path((user_id, provider)): Path<(Uuid, String)>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncReport>> {
    let provider = parse_provider(&provider)?;
    let report = state.sync.sync(user_id, provider, params.since).await?;
    Ok(Json(report))
}

async fn import_apple(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<IngestReport>> {
    let report = state.sync.import_apple(user_id, &payload).await?;
    Ok(Json(report))
}

// ─── Records ─────────────────────────────────────────────────

async fn get_records(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HealthRecordQuery>,
) -> Result<Json<Vec<HealthRecordResponse>>> {
    let records = state.records.get_records_response(&query, user_id).await?;
    Ok(Json(records))
}

async fn get_workouts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HealthRecordQuery>,
) -> Result<Json<Vec<HealthRecordResponse>>> {
    if query.category.is_some_and(|c| c != crate::models::HealthCategory::Workout) {
        return Err(AppError::BadRequest(
            "category filter conflicts with /workouts".to_string(),
        ));
    }
    let records = state.records.get_workouts_response(&query, user_id).await?;
    Ok(Json(records))
}
