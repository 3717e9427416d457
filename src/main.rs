// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wearables-Sync API Server
//!
//! Connects wearable providers and serves the merged health record store.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wearables_sync::{
    config::{Config, StoreBackend},
    db::{CredentialStore, FirestoreDb, HealthRecordStore, MemoryStore},
    services::{http::provider_http_client, KmsService},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        backend = ?config.store_backend,
        merge_tolerance_secs = config.merge_tolerance_secs,
        "Starting Wearables-Sync API"
    );

    let (credentials, records): (Arc<dyn CredentialStore>, Arc<dyn HealthRecordStore>) =
        match config.store_backend {
            StoreBackend::Firestore => {
                // Initialize KMS service
                let kms = KmsService::new(
                    &config.gcp_project_id,
                    &config.gcp_region,
                    "token-encryption",
                )
                .await?;
                tracing::info!("KMS service initialized");

                let db = Arc::new(FirestoreDb::new(&config.gcp_project_id, kms).await?);
                (db.clone() as Arc<dyn CredentialStore>, db as Arc<dyn HealthRecordStore>)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn CredentialStore>, store as Arc<dyn HealthRecordStore>)
            }
        };

    let http = provider_http_client()?;

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), credentials, records, http));

    // Build router
    let app = wearables_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wearables_sync=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
