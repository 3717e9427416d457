// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end ingest: provider payload → normalization → merge → store.

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use wearables_sync::db::{HealthRecordStore, MemoryStore};
use wearables_sync::error::AppError;
use wearables_sync::models::{HealthCategory, HealthRecord, HealthRecordQuery};
use wearables_sync::services::{AppleHandler, MergePolicy, NormalizationPipeline};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::{api_request, body_json, create_test_app, seed_whoop_credential};

fn whoop_workout(id: &str, start: &str, end: &str) -> Value {
    json!({
        "id": id,
        "start": start,
        "end": end,
        "sport_id": 0,
        "score_state": "SCORED",
        "score": { "average_heart_rate": 142, "max_heart_rate": 176 }
    })
}

fn whoop_sleep(id: &str, start: &str, end: &str) -> Value {
    json!({
        "id": id,
        "start": start,
        "end": end,
        "nap": false,
        "score": { "stage_summary": { "total_in_bed_time_milli": 27_000_000 } }
    })
}

fn page(records: Vec<Value>, next_token: Option<&str>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "records": records,
        "next_token": next_token
    }))
}

fn apple_export() -> Value {
    json!({
        "data": {
            "workouts": [
                {
                    "id": "apple-run-1",
                    "name": "Outdoor Run",
                    "start": "2024-03-02 07:00:00 -0800",
                    "end": "2024-03-02 07:30:00 -0800",
                    "duration": 1800,
                    "sourceName": "Apple Watch",
                    "avgHeartRate": { "qty": 150, "units": "count/min" },
                    "maxHeartRate": { "qty": 171, "units": "count/min" }
                },
                {
                    "name": "Broken",
                    "start": "not a date",
                    "end": "2024-03-02 09:00:00 -0800"
                }
            ],
            "metrics": [
                {
                    "name": "sleep_analysis",
                    "units": "hr",
                    "data": [
                        {
                            "sleepStart": "2024-03-01 23:10:00 -0800",
                            "sleepEnd": "2024-03-02 06:40:00 -0800",
                            "totalSleep": 7.1,
                            "source": "Apple Watch"
                        }
                    ]
                }
            ]
        }
    })
}

async fn mount_empty_sleeps(app: &common::TestApp) {
    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/sleep"))
        .respond_with(page(vec![], None))
        .mount(&app.whoop)
        .await;
}

// ═══════════════════════════════════════════════════════════════════════════
// WHOOP SYNC
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_whoop_sync_follows_pagination() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();
    seed_whoop_credential(&app.store, user_id, "at-1", "rt-1", Utc::now() + Duration::hours(1)).await;

    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .and(query_param_is_missing("nextToken"))
        .respond_with(page(
            vec![whoop_workout("w1", "2024-03-01T10:00:00.000Z", "2024-03-01T11:00:00.000Z")],
            Some("page-2"),
        ))
        .expect(1)
        .mount(&app.whoop)
        .await;
    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .and(query_param("nextToken", "page-2"))
        .respond_with(page(
            vec![whoop_workout("w2", "2024-03-02T10:00:00.000Z", "2024-03-02T10:45:00.000Z")],
            None,
        ))
        .expect(1)
        .mount(&app.whoop)
        .await;
    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/sleep"))
        .respond_with(page(
            vec![whoop_sleep("s1", "2024-03-01T23:00:00.000Z", "2024-03-02T06:30:00.000Z")],
            None,
        ))
        .mount(&app.whoop)
        .await;

    let response = app
        .router
        .clone()
        .oneshot(api_request(
            "POST",
            &format!("/api/v1/users/{}/sync/whoop", user_id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    assert_eq!(report["provider"], "whoop");
    assert_eq!(report["received"], 3);
    assert_eq!(report["inserted"], 3);
    assert_eq!(report["merged"], 0);
    assert_eq!(app.store.record_count(user_id), 3);

    let records = app
        .store
        .query_records(user_id, &HealthRecordQuery::default())
        .await
        .unwrap();
    let sleep = records
        .iter()
        .find(|r| r.category == HealthCategory::Sleep)
        .unwrap();
    assert_eq!(sleep.duration_seconds, 27_000.0);
    let run = records
        .iter()
        .find(|r| r.provider_id.as_deref() == Some("w1"))
        .unwrap();
    assert_eq!(run.record_type.as_deref(), Some("running"));
    assert_eq!(run.heart_rate_max, Some(176.0));
}

#[tokio::test]
async fn test_whoop_resync_merges_instead_of_duplicating() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();
    seed_whoop_credential(&app.store, user_id, "at-1", "rt-1", Utc::now() + Duration::hours(1)).await;

    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .respond_with(page(
            vec![whoop_workout("w1", "2024-03-01T10:00:00.000Z", "2024-03-01T11:00:00.000Z")],
            None,
        ))
        .mount(&app.whoop)
        .await;
    mount_empty_sleeps(&app).await;

    let sync = &app.state.sync;
    let first = sync
        .sync(user_id, wearables_sync::models::ProviderName::Whoop, None)
        .await
        .unwrap();
    assert_eq!(first.ingest.inserted, 1);

    let second = sync
        .sync(user_id, wearables_sync::models::ProviderName::Whoop, None)
        .await
        .unwrap();
    assert_eq!(second.ingest.inserted, 0);
    assert_eq!(second.ingest.merged, 1);
    assert_eq!(app.store.record_count(user_id), 1);
}

#[tokio::test]
async fn test_whoop_back_to_back_workouts_are_kept_apart() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();
    seed_whoop_credential(&app.store, user_id, "at-1", "rt-1", Utc::now() + Duration::hours(1)).await;

    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .respond_with(page(
            vec![
                whoop_workout("w-1", "2024-03-01T07:00:00.000Z", "2024-03-01T08:00:00.000Z"),
                whoop_workout("w-2", "2024-03-01T08:01:30.000Z", "2024-03-01T09:00:00.000Z"),
            ],
            None,
        ))
        .mount(&app.whoop)
        .await;
    mount_empty_sleeps(&app).await;

    let report = app
        .state
        .sync
        .sync(user_id, wearables_sync::models::ProviderName::Whoop, None)
        .await
        .unwrap();

    assert_eq!(report.ingest.accepted, 2);
    assert_eq!(report.ingest.inserted, 2);
    assert_eq!(report.ingest.merged, 0);
    assert_eq!(app.store.record_count(user_id), 2);
}

#[tokio::test]
async fn test_whoop_unauthorized_triggers_one_refresh() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();
    seed_whoop_credential(&app.store, user_id, "at-revoked", "rt-1", Utc::now() + Duration::hours(1)).await;

    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .and(header("authorization", "Bearer at-revoked"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&app.whoop)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-fresh",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&app.whoop)
        .await;
    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .and(header("authorization", "Bearer at-fresh"))
        .respond_with(page(
            vec![whoop_workout("w1", "2024-03-01T10:00:00.000Z", "2024-03-01T11:00:00.000Z")],
            None,
        ))
        .mount(&app.whoop)
        .await;
    mount_empty_sleeps(&app).await;

    let report = app
        .state
        .sync
        .sync(user_id, wearables_sync::models::ProviderName::Whoop, None)
        .await
        .unwrap();
    assert_eq!(report.ingest.inserted, 1);
}

#[tokio::test]
async fn test_sync_without_connection_is_not_found() {
    let app = create_test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(api_request(
            "POST",
            &format!("/api/v1/users/{}/sync/whoop", Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_connected");
}

#[tokio::test]
async fn test_sync_apple_is_bad_request() {
    let app = create_test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(api_request(
            "POST",
            &format!("/api/v1/users/{}/sync/apple", Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ═══════════════════════════════════════════════════════════════════════════
// APPLE IMPORT
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_apple_import_reports_rejections() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();

    let response = app
        .router
        .clone()
        .oneshot(api_request(
            "POST",
            &format!("/api/v1/users/{}/import/apple", user_id),
            Some(apple_export()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    assert_eq!(report["received"], 3);
    assert_eq!(report["accepted"], 2);
    assert_eq!(report["inserted"], 2);
    let rejected = report["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["collection"], "workouts");
    assert_eq!(rejected[0]["index"], 1);
}

#[tokio::test]
async fn test_apple_reimport_is_idempotent() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();

    let first = app.state.sync.import_apple(user_id, &apple_export()).await.unwrap();
    let second = app.state.sync.import_apple(user_id, &apple_export()).await.unwrap();

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.merged, 2);
    assert_eq!(app.store.record_count(user_id), 2);
}

/// Memory store whose overlap lookup is slow enough for ingests to interleave.
struct SlowLookupStore {
    inner: MemoryStore,
}

#[async_trait]
impl HealthRecordStore for SlowLookupStore {
    async fn records_overlapping(
        &self,
        user_id: Uuid,
        source_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>, AppError> {
        let found = self
            .inner
            .records_overlapping(user_id, source_name, start, end)
            .await?;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(found)
    }

    async fn upsert_health_records(
        &self,
        user_id: Uuid,
        records: &[HealthRecord],
    ) -> Result<(), AppError> {
        self.inner.upsert_health_records(user_id, records).await
    }

    async fn query_records(
        &self,
        user_id: Uuid,
        query: &HealthRecordQuery,
    ) -> Result<Vec<HealthRecord>, AppError> {
        self.inner.query_records(user_id, query).await
    }
}

#[tokio::test]
async fn test_concurrent_imports_do_not_duplicate() {
    let memory = MemoryStore::new();
    let pipeline = NormalizationPipeline::new(Arc::new(SlowLookupStore {
        inner: memory.clone(),
    }));
    let handler = AppleHandler::new(MergePolicy::default());
    let user_id = Uuid::new_v4();
    let export = apple_export();

    let (first, second) = tokio::join!(
        pipeline.ingest(user_id, &handler, &export),
        pipeline.ingest(user_id, &handler, &export),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.inserted + second.inserted, 2);
    assert_eq!(first.merged + second.merged, 2);
    assert_eq!(memory.record_count(user_id), 2);
}

#[tokio::test]
async fn test_apple_and_whoop_records_are_not_merged() {
    let app = create_test_app().await;
    let user_id = Uuid::new_v4();
    seed_whoop_credential(&app.store, user_id, "at-1", "rt-1", Utc::now() + Duration::hours(1)).await;

    // Same run as the Apple export, seen by Whoop
    Mock::given(method("GET"))
        .and(path("/developer/v2/activity/workout"))
        .respond_with(page(
            vec![whoop_workout("w1", "2024-03-02T15:00:00.000Z", "2024-03-02T15:30:00.000Z")],
            None,
        ))
        .mount(&app.whoop)
        .await;
    mount_empty_sleeps(&app).await;

    app.state.sync.import_apple(user_id, &apple_export()).await.unwrap();
    app.state
        .sync
        .sync(user_id, wearables_sync::models::ProviderName::Whoop, None)
        .await
        .unwrap();

    assert_eq!(app.store.record_count(user_id), 3);
}

#[tokio::test]
async fn test_apple_import_rejects_non_object() {
    let app = create_test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(api_request(
            "POST",
            &format!("/api/v1/users/{}/import/apple", Uuid::new_v4()),
            Some(json!([1, 2, 3])),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
