//! Persistence layer.
//!
//! Services depend on the [`CredentialStore`] and [`HealthRecordStore`]
//! traits; [`FirestoreDb`] backs production and [`MemoryStore`] backs local
//! runs and tests.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{
    CredentialKey, HealthRecord, HealthRecordQuery, ProviderCredential,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Collection names as constants.
pub mod collections {
    /// Provider credentials (keyed by `{user_id}:{provider}`)
    pub const CREDENTIALS: &str = "provider_credentials";
    /// Canonical health records (keyed by record id)
    pub const HEALTH_RECORDS: &str = "health_records";
}

/// Storage for OAuth credentials, one per (user, provider).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(
        &self,
        key: CredentialKey,
    ) -> Result<Option<ProviderCredential>, AppError>;

    /// Create or replace. Returns only after the write is durable.
    async fn upsert_credential(&self, credential: &ProviderCredential) -> Result<(), AppError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete_credential(&self, key: CredentialKey) -> Result<bool, AppError>;
}

/// Storage for canonical health records.
#[async_trait]
pub trait HealthRecordStore: Send + Sync {
    /// Records of `user_id` from `source_name` whose window intersects
    /// `[start, end]` (inclusive).
    async fn records_overlapping(
        &self,
        user_id: Uuid,
        source_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>, AppError>;

    /// Insert or replace records by id. All records belong to `user_id`.
    async fn upsert_health_records(
        &self,
        user_id: Uuid,
        records: &[HealthRecord],
    ) -> Result<(), AppError>;

    /// Filtered, sorted and paginated listing.
    async fn query_records(
        &self,
        user_id: Uuid,
        query: &HealthRecordQuery,
    ) -> Result<Vec<HealthRecord>, AppError>;
}

fn check_ownership(user_id: Uuid, records: &[HealthRecord]) -> Result<(), AppError> {
    match records.iter().find(|r| r.user_id != user_id) {
        Some(foreign) => Err(AppError::Internal(anyhow::anyhow!(
            "record {} does not belong to user {}",
            foreign.id,
            user_id
        ))),
        None => Ok(()),
    }
}
