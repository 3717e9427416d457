// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::Request;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use wearables_sync::config::Config;
use wearables_sync::db::{CredentialStore, FirestoreDb, MemoryStore};
use wearables_sync::models::{CredentialStatus, ProviderCredential, ProviderName};
use wearables_sync::routes::create_router;
use wearables_sync::services::KmsService;
use wearables_sync::AppState;
use wiremock::MockServer;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project", KmsService::new_mock())
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Test app backed by the in-memory store, with Whoop pointed at `whoop`.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub whoop: MockServer,
}

/// Config whose Whoop endpoints live on the mock server.
#[allow(dead_code)]
pub fn test_config(whoop: &MockServer) -> Config {
    let mut config = Config::test_default();
    if let Some(settings) = config.whoop.as_mut() {
        settings.oauth_base_url = format!("{}/oauth/oauth2", whoop.uri());
        settings.api_base_url = format!("{}/developer", whoop.uri());
    }
    config
}

#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    let whoop = MockServer::start().await;
    create_test_app_with(test_config(&whoop), whoop)
}

#[allow(dead_code)]
pub fn create_test_app_with(config: Config, whoop: MockServer) -> TestApp {
    let store = MemoryStore::new();
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(
        config,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        http,
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        whoop,
    }
}

/// Store an active Whoop credential directly.
#[allow(dead_code)]
pub async fn seed_whoop_credential(
    store: &MemoryStore,
    user_id: Uuid,
    access_token: &str,
    refresh_token: &str,
    expires_at: DateTime<Utc>,
) -> ProviderCredential {
    let now = Utc::now();
    let credential = ProviderCredential {
        user_id,
        provider: ProviderName::Whoop,
        access_token: access_token.to_string(),
        refresh_token: Some(refresh_token.to_string()),
        expires_at: Some(expires_at),
        granted_scope: "offline read:workout read:sleep".to_string(),
        provider_user_id: Some("10129".to_string()),
        status: CredentialStatus::Active,
        created_at: now - Duration::days(1),
        updated_at: now - Duration::days(1),
    };
    store.upsert_credential(&credential).await.unwrap();
    credential
}

/// GET/POST/DELETE with the test API key.
#[allow(dead_code)]
pub fn api_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", Config::test_default().api_key);

    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Collect a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse an RFC 3339 timestamp.
#[allow(dead_code)]
pub fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}
