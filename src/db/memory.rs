// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory store for local runs and tests.

use super::{check_ownership, CredentialStore, HealthRecordStore};
use crate::error::AppError;
use crate::models::{
    CredentialKey, HealthRecord, HealthRecordQuery, ProviderCredential,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Process-local store. Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    credentials: Arc<DashMap<CredentialKey, ProviderCredential>>,
    /// Records per user, keyed by record id.
    records: Arc<DashMap<Uuid, DashMap<Uuid, HealthRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records for a user.
    pub fn record_count(&self, user_id: Uuid) -> usize {
        self.records.get(&user_id).map_or(0, |r| r.len())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(
        &self,
        key: CredentialKey,
    ) -> Result<Option<ProviderCredential>, AppError> {
        Ok(self.credentials.get(&key).map(|c| c.clone()))
    }

    async fn upsert_credential(&self, credential: &ProviderCredential) -> Result<(), AppError> {
        self.credentials.insert(credential.key(), credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, key: CredentialKey) -> Result<bool, AppError> {
        Ok(self.credentials.remove(&key).is_some())
    }
}

#[async_trait]
impl HealthRecordStore for MemoryStore {
    async fn records_overlapping(
        &self,
        user_id: Uuid,
        source_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HealthRecord>, AppError> {
        let Some(records) = self.records.get(&user_id) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<HealthRecord> = records
            .iter()
            .filter(|r| {
                r.source_name == source_name && r.start_datetime <= end && r.end_datetime >= start
            })
            .map(|r| r.clone())
            .collect();
        found.sort_by(|a, b| a.start_datetime.cmp(&b.start_datetime).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn upsert_health_records(
        &self,
        user_id: Uuid,
        records: &[HealthRecord],
    ) -> Result<(), AppError> {
        check_ownership(user_id, records)?;
        let stored = self.records.entry(user_id).or_default();
        for record in records {
            stored.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn query_records(
        &self,
        user_id: Uuid,
        query: &HealthRecordQuery,
    ) -> Result<Vec<HealthRecord>, AppError> {
        let Some(records) = self.records.get(&user_id) else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<HealthRecord> = records
            .iter()
            .filter(|r| query.matches(r))
            .map(|r| r.clone())
            .collect();
        matching.sort_by(|a, b| query.compare(a, b));

        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }
}
