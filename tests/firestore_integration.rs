// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running.
//! Run with: FIRESTORE_EMULATOR_HOST=localhost:8181 cargo test --test firestore_integration
//!
//! The emulator provides a clean state for each test run.

use chrono::{Duration, Utc};
use uuid::Uuid;
use wearables_sync::db::{CredentialStore, HealthRecordStore};
use wearables_sync::models::{
    AggregateStats, CredentialKey, CredentialStatus, HealthCategory, HealthRecord,
    HealthRecordQuery, NewHealthRecord, ProviderCredential, ProviderName, SortField, SortOrder,
};

mod common;
use common::{parse_time, test_db};

fn test_credential(user_id: Uuid) -> ProviderCredential {
    let now = Utc::now();
    ProviderCredential {
        user_id,
        provider: ProviderName::Whoop,
        access_token: "access-token-plaintext".to_string(),
        refresh_token: Some("refresh-token-plaintext".to_string()),
        expires_at: Some(now + Duration::hours(1)),
        granted_scope: "offline read:workout".to_string(),
        provider_user_id: Some("10129".to_string()),
        status: CredentialStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

fn workout(user_id: Uuid, provider_id: &str, start: &str, minutes: i64) -> HealthRecord {
    let start = parse_time(start);
    HealthRecord::from_new(
        user_id,
        NewHealthRecord {
            provider_id: Some(provider_id.to_string()),
            category: HealthCategory::Workout,
            record_type: Some("running".to_string()),
            source_name: "whoop".to_string(),
            device_id: None,
            start_datetime: start,
            end_datetime: start + Duration::minutes(minutes),
            duration_seconds: (minutes * 60) as f64,
            heart_rate: AggregateStats::new(Some(90.0), Some(170.0), Some(140.0)).unwrap(),
            steps: AggregateStats::default(),
        },
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// CREDENTIAL TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_credential_crud() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let key = CredentialKey::new(user_id, ProviderName::Whoop);

    assert!(db.get_credential(key).await.unwrap().is_none());

    let credential = test_credential(user_id);
    db.upsert_credential(&credential).await.unwrap();

    let loaded = db.get_credential(key).await.unwrap().expect("credential");
    assert_eq!(loaded.access_token, credential.access_token);
    assert_eq!(loaded.refresh_token, credential.refresh_token);
    assert_eq!(loaded.provider_user_id, credential.provider_user_id);
    assert_eq!(loaded.status, CredentialStatus::Active);

    assert!(db.delete_credential(key).await.unwrap());
    assert!(!db.delete_credential(key).await.unwrap());
    assert!(db.get_credential(key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_credential_upsert_replaces_tokens() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let key = CredentialKey::new(user_id, ProviderName::Whoop);

    db.upsert_credential(&test_credential(user_id)).await.unwrap();
    let rotated = ProviderCredential {
        refresh_token: Some("rotated".to_string()),
        status: CredentialStatus::Stale,
        ..test_credential(user_id)
    };
    db.upsert_credential(&rotated).await.unwrap();

    let loaded = db.get_credential(key).await.unwrap().unwrap();
    assert_eq!(loaded.refresh_token.as_deref(), Some("rotated"));
    assert_eq!(loaded.status, CredentialStatus::Stale);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORD TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_records_overlapping_window() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let records = vec![
        workout(user_id, "w1", "2024-03-01T10:00:00Z", 60),
        workout(user_id, "w2", "2024-03-01T14:00:00Z", 30),
        workout(user_id, "w3", "2024-03-02T10:00:00Z", 45),
    ];
    db.upsert_health_records(user_id, &records).await.unwrap();

    let found = db
        .records_overlapping(
            user_id,
            "whoop",
            parse_time("2024-03-01T10:30:00Z"),
            parse_time("2024-03-01T14:10:00Z"),
        )
        .await
        .unwrap();
    let mut ids: Vec<_> = found.iter().filter_map(|r| r.provider_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["w1", "w2"]);

    let other_source = db
        .records_overlapping(
            user_id,
            "apple",
            parse_time("2024-03-01T00:00:00Z"),
            parse_time("2024-03-03T00:00:00Z"),
        )
        .await
        .unwrap();
    assert!(other_source.is_empty());
}

#[tokio::test]
async fn test_record_upsert_is_idempotent() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let mut record = workout(user_id, "w1", "2024-03-01T10:00:00Z", 60);
    db.upsert_health_records(user_id, std::slice::from_ref(&record))
        .await
        .unwrap();

    record.heart_rate_max = Some(180.0);
    db.upsert_health_records(user_id, std::slice::from_ref(&record))
        .await
        .unwrap();

    let all = db
        .query_records(user_id, &HealthRecordQuery::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].heart_rate_max, Some(180.0));
}

#[tokio::test]
async fn test_large_upsert_spans_batches() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    let base = parse_time("2024-01-01T00:00:00Z");
    let records: Vec<_> = (0..450)
        .map(|i| {
            let start = (base + Duration::hours(i)).to_rfc3339();
            workout(user_id, &format!("w{}", i), &start, 30)
        })
        .collect();

    db.upsert_health_records(user_id, &records).await.unwrap();

    let query = HealthRecordQuery {
        limit: 100,
        offset: 400,
        sort_order: SortOrder::Asc,
        ..Default::default()
    };
    let tail = db.query_records(user_id, &query).await.unwrap();
    assert_eq!(tail.len(), 50);
}

#[tokio::test]
async fn test_query_filters_and_sort() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    db.upsert_health_records(
        user_id,
        &[
            workout(user_id, "short", "2024-03-01T10:00:00Z", 20),
            workout(user_id, "long", "2024-03-02T10:00:00Z", 90),
            workout(user_id, "medium", "2024-03-03T10:00:00Z", 45),
        ],
    )
    .await
    .unwrap();

    let query = HealthRecordQuery {
        category: Some(HealthCategory::Workout),
        sort_by: SortField::DurationSeconds,
        sort_order: SortOrder::Desc,
        ..Default::default()
    };
    let sorted = db.query_records(user_id, &query).await.unwrap();
    let ids: Vec<_> = sorted.iter().filter_map(|r| r.provider_id.as_deref()).collect();
    assert_eq!(ids, vec!["long", "medium", "short"]);

    let query = HealthRecordQuery {
        start_datetime: Some(parse_time("2024-03-02T00:00:00Z")),
        ..Default::default()
    };
    assert_eq!(db.query_records(user_id, &query).await.unwrap().len(), 2);
}
