// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore implementation of the persistence traits.
//!
//! - `provider_credentials`: one document per (user, provider), tokens
//!   KMS-encrypted
//! - `health_records`: one document per canonical record

use super::{check_ownership, collections, CredentialStore, HealthRecordStore};
use crate::error::AppError;
use crate::models::{
    CredentialKey, CredentialStatus, HealthRecord, HealthRecordQuery, ProviderCredential,
    ProviderName, SortOrder,
};
use crate::services::kms::{self, KmsService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::{FirestoreQueryDirection, FirestoreTimestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Credential document as stored. Tokens are never written in clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    user_id: Uuid,
    provider: ProviderName,
    access_token_encrypted: String,
    refresh_token_encrypted: Option<String>,
    #[serde(default, with = "firestore::serialize_as_optional_timestamp")]
    expires_at: Option<DateTime<Utc>>,
    granted_scope: String,
    provider_user_id: Option<String>,
    #[serde(default)]
    status: CredentialStatus,
    #[serde(with = "firestore::serialize_as_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "firestore::serialize_as_timestamp")]
    updated_at: DateTime<Utc>,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
    kms: KmsService,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str, kms: KmsService) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id, kms).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
            kms,
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str, kms: KmsService) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
            kms,
        })
    }

    /// Offline client for tests: every operation returns an error.
    #[cfg(debug_assertions)]
    pub fn new_mock() -> Self {
        Self {
            client: None,
            kms: KmsService::new_mock(),
        }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn seal(&self, credential: &ProviderCredential) -> Result<StoredCredential, AppError> {
        let (access_token_encrypted, refresh_token_encrypted) = kms::encrypt_tokens(
            &self.kms,
            credential.key(),
            &credential.access_token,
            credential.refresh_token.as_deref(),
        )
        .await?;

        Ok(StoredCredential {
            user_id: credential.user_id,
            provider: credential.provider,
            access_token_encrypted,
            refresh_token_encrypted,
            expires_at: credential.expires_at,
            granted_scope: credential.granted_scope.clone(),
            provider_user_id: credential.provider_user_id.clone(),
            status: credential.status,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        })
    }

    async fn open(&self, stored: StoredCredential) -> Result<ProviderCredential, AppError> {
        let key = CredentialKey::new(stored.user_id, stored.provider);
        let (access_token, refresh_token) = kms::decrypt_tokens(
            &self.kms,
            key,
            &stored.access_token_encrypted,
            stored.refresh_token_encrypted.as_deref(),
        )
        .await?;

        Ok(ProviderCredential {
            user_id: stored.user_id,
            provider: stored.provider,
            access_token,
            refresh_token,
            expires_at: stored.expires_at,
            granted_scope: stored.granted_scope,
            provider_user_id: stored.provider_user_id,
            status: stored.status,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }
}

#[async_trait]
impl CredentialStore for FirestoreDb {
    async fn get_credential(
        &self,
        key: CredentialKey,
    ) -> Result<Option<ProviderCredential>, AppError> {
        let stored: Option<StoredCredential> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(&key.document_id())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match stored {
            Some(stored) => Ok(Some(self.open(stored).await?)),
            None => Ok(None),
        }
    }

    async fn upsert_credential(&self, credential: &ProviderCredential) -> Result<(), AppError> {
        let stored = self.seal(credential).await?;

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(credential.key().document_id())
            .object(&stored)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_credential(&self, key: CredentialKey) -> Result<bool, AppError> {
        let existed = self.get_credential(key).await?.is_some();

        self.get_client()?
            .fluent()
            .delete()
            .from(collections::CREDENTIALS)
            .document_id(key.document_id())
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(existed)
    }
}

#[async_trait]
impl HealthRecordStore for FirestoreDb {
    async fn records_overlapping(
        &self,
        user_id: Uuid,
        source_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>, AppError> {
        let user = user_id.to_string();
        let source = source_name.to_string();

        // Firestore allows a range filter on one field here; the other side
        // of the overlap test is applied below.
        let candidates: Vec<HealthRecord> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::HEALTH_RECORDS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user.clone()),
                    q.field("source_name").eq(source.clone()),
                    q.field("start_datetime")
                        .less_than_or_equal(FirestoreTimestamp(end)),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(candidates
            .into_iter()
            .filter(|r| r.end_datetime >= start)
            .collect())
    }

    /// Writes in transactions of up to [`BATCH_SIZE`] documents.
    async fn upsert_health_records(
        &self,
        user_id: Uuid,
        records: &[HealthRecord],
    ) -> Result<(), AppError> {
        check_ownership(user_id, records)?;
        let client = self.get_client()?;

        for chunk in records.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for record in chunk {
                client
                    .fluent()
                    .update()
                    .in_col(collections::HEALTH_RECORDS)
                    .document_id(record.id.to_string())
                    .object(record)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add record to transaction: {}",
                            e
                        ))
                    })?;
            }

            transaction
                .commit()
                .await
                .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        }

        tracing::debug!(%user_id, count = records.len(), "Health records committed");
        Ok(())
    }

    async fn query_records(
        &self,
        user_id: Uuid,
        query: &HealthRecordQuery,
    ) -> Result<Vec<HealthRecord>, AppError> {
        let user = user_id.to_string();
        let filters = query.clone();
        let direction = match query.sort_order {
            SortOrder::Asc => FirestoreQueryDirection::Ascending,
            SortOrder::Desc => FirestoreQueryDirection::Descending,
        };

        self.get_client()?
            .fluent()
            .select()
            .from(collections::HEALTH_RECORDS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user.clone()),
                    filters
                        .category
                        .and_then(|c| q.field("category").eq(c.as_str())),
                    filters
                        .record_type
                        .as_ref()
                        .and_then(|t| q.field("type").eq(t.clone())),
                    filters
                        .source_name
                        .as_ref()
                        .and_then(|s| q.field("source_name").eq(s.clone())),
                    filters
                        .device_id
                        .as_ref()
                        .and_then(|d| q.field("device_id").eq(d.clone())),
                    filters.start_datetime.and_then(|s| {
                        q.field("start_datetime")
                            .greater_than_or_equal(FirestoreTimestamp(s))
                    }),
                    filters.end_datetime.and_then(|e| {
                        q.field("end_datetime")
                            .less_than_or_equal(FirestoreTimestamp(e))
                    }),
                ])
            })
            .order_by([
                (query.sort_by.field_name(), direction.clone()),
                ("id", direction),
            ])
            .limit(query.limit)
            .offset(query.offset)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
