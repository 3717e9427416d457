// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read side of the canonical record store.

use crate::db::HealthRecordStore;
use crate::error::AppError;
use crate::models::{HealthCategory, HealthRecordQuery, HealthRecordResponse};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct HealthRecordService {
    store: Arc<dyn HealthRecordStore>,
}

impl HealthRecordService {
    pub fn new(store: Arc<dyn HealthRecordStore>) -> Self {
        Self { store }
    }

    /// Records of `user_id` matching `query`, sorted and paginated.
    pub async fn get_records_response(
        &self,
        query: &HealthRecordQuery,
        user_id: Uuid,
    ) -> Result<Vec<HealthRecordResponse>, AppError> {
        query
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let records = self.store.query_records(user_id, query).await?;
        tracing::debug!(%user_id, count = records.len(), "Records query");
        Ok(records.into_iter().map(HealthRecordResponse::from).collect())
    }

    /// Same as [`Self::get_records_response`] restricted to workouts.
    pub async fn get_workouts_response(
        &self,
        query: &HealthRecordQuery,
        user_id: Uuid,
    ) -> Result<Vec<HealthRecordResponse>, AppError> {
        let query = HealthRecordQuery {
            category: Some(HealthCategory::Workout),
            ..query.clone()
        };
        self.get_records_response(&query, user_id).await
    }
}
