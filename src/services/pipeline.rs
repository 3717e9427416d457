// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Normalization pipeline: handler output → deduplicated, persisted records.
//!
//! ## Merge policy
//!
//! A candidate duplicates an existing record when both have the same
//! `source_name` and category, and either
//! - both carry the same provider record ID, or
//! - at most one carries a provider record ID and their time windows share
//!   at least the policy tolerance, or all of the shorter window when it is
//!   shorter than the tolerance.
//!
//! Two records with different provider IDs are always distinct, and
//! windows that only touch or sit side by side never merge.
//!
//! Observations are ordered: stored records first, then candidates in
//! payload order. On a duplicate the later observation replaces the earlier
//! one's type, device, window and aggregates as a whole. The earlier
//! record's ID is kept so repeated syncs update in place.
//!
//! Read, reconcile and upsert run under a per-(user, source) lock so two
//! concurrent ingests cannot both insert the same event.

use crate::db::HealthRecordStore;
use crate::error::AppError;
use crate::models::{HealthRecord, NewHealthRecord};
use crate::services::providers::{NormalizationError, ProviderHandler};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How much two observations must overlap to count as the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub tolerance: Duration,
}

impl MergePolicy {
    pub fn from_secs(secs: i64) -> Self {
        Self {
            tolerance: Duration::seconds(secs.max(0)),
        }
    }

    pub fn is_duplicate(&self, existing: &HealthRecord, candidate: &NewHealthRecord) -> bool {
        if existing.source_name != candidate.source_name || existing.category != candidate.category
        {
            return false;
        }

        if let (Some(a), Some(b)) = (&existing.provider_id, &candidate.provider_id) {
            return a == b;
        }

        self.windows_overlap(
            (existing.start_datetime, existing.end_datetime),
            (candidate.start_datetime, candidate.end_datetime),
        )
    }

    fn windows_overlap(
        &self,
        a: (DateTime<Utc>, DateTime<Utc>),
        b: (DateTime<Utc>, DateTime<Utc>),
    ) -> bool {
        if a == b {
            return true;
        }
        let shared = a.1.min(b.1) - a.0.max(b.0);
        let shorter = (a.1 - a.0).min(b.1 - b.0);
        shared > Duration::zero() && shared >= self.tolerance.min(shorter)
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from_secs(crate::config::DEFAULT_MERGE_TOLERANCE_SECS)
    }
}

/// Records to upsert after reconciliation.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// New records plus stored records that were superseded.
    pub records: Vec<HealthRecord>,
    pub inserted: usize,
    pub merged: usize,
}

/// Merge `candidates` into `stored` under `policy`. Pure.
pub fn reconcile(
    user_id: Uuid,
    stored: Vec<HealthRecord>,
    candidates: Vec<NewHealthRecord>,
    policy: MergePolicy,
) -> Reconciled {
    // (record, needs_write)
    let mut working: Vec<(HealthRecord, bool)> =
        stored.into_iter().map(|r| (r, false)).collect();
    let mut inserted = 0;
    let mut merged = 0;

    for candidate in candidates {
        match working
            .iter_mut()
            .find(|(existing, _)| policy.is_duplicate(existing, &candidate))
        {
            Some((existing, dirty)) => {
                existing.supersede_with(candidate);
                *dirty = true;
                merged += 1;
            }
            None => {
                working.push((HealthRecord::from_new(user_id, candidate), true));
                inserted += 1;
            }
        }
    }

    Reconciled {
        records: working
            .into_iter()
            .filter_map(|(record, dirty)| dirty.then_some(record))
            .collect(),
        inserted,
        merged,
    }
}

/// Outcome of one ingest call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Records found in the payload.
    pub received: usize,
    pub accepted: usize,
    /// Accepted records stored as new.
    pub inserted: usize,
    /// Accepted records folded into an existing record.
    pub merged: usize,
    pub rejected: Vec<NormalizationError>,
}

impl IngestReport {
    pub fn absorb(&mut self, other: IngestReport) {
        self.received += other.received;
        self.accepted += other.accepted;
        self.inserted += other.inserted;
        self.merged += other.merged;
        self.rejected.extend(other.rejected);
    }
}

/// Per-(user, source) locks serializing ingest read-modify-write cycles.
type IngestLocks = Arc<DashMap<(Uuid, &'static str), Arc<Mutex<()>>>>;

/// Runs handlers and commits their output.
#[derive(Clone)]
pub struct NormalizationPipeline {
    store: Arc<dyn HealthRecordStore>,
    locks: IngestLocks,
}

impl NormalizationPipeline {
    pub fn new(store: Arc<dyn HealthRecordStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, user_id: Uuid, source_name: &'static str) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id, source_name))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Normalize `payload`, reconcile against stored records and upsert.
    ///
    /// Rejected records are reported, not fatal: the rest of the batch is
    /// still committed. Only an unreadable payload fails the call.
    pub async fn ingest(
        &self,
        user_id: Uuid,
        handler: &dyn ProviderHandler,
        payload: &serde_json::Value,
    ) -> Result<IngestReport, AppError> {
        let normalized = handler
            .normalize(payload)
            .map_err(|e| AppError::BadRequest(format!("{} payload: {}", handler.provider(), e)))?;

        let received = normalized.total();
        for rejected in &normalized.rejected {
            tracing::warn!(
                %user_id,
                provider = %handler.provider(),
                collection = rejected.collection,
                index = rejected.index,
                reason = %rejected.reason,
                "Record rejected during normalization"
            );
        }

        let accepted = normalized.accepted.len();
        let Some((start, end)) = span(&normalized.accepted) else {
            return Ok(IngestReport {
                received,
                rejected: normalized.rejected,
                ..Default::default()
            });
        };

        let policy = handler.merge_policy();
        let lock = self.lock_for(user_id, handler.source_name());
        let _guard = lock.lock().await;

        let stored = self
            .store
            .records_overlapping(
                user_id,
                handler.source_name(),
                start - policy.tolerance,
                end + policy.tolerance,
            )
            .await?;

        let reconciled = reconcile(user_id, stored, normalized.accepted, policy);
        self.store
            .upsert_health_records(user_id, &reconciled.records)
            .await?;

        tracing::info!(
            %user_id,
            provider = %handler.provider(),
            received,
            accepted,
            inserted = reconciled.inserted,
            merged = reconciled.merged,
            rejected = normalized.rejected.len(),
            "Payload ingested"
        );

        Ok(IngestReport {
            received,
            accepted,
            inserted: reconciled.inserted,
            merged: reconciled.merged,
            rejected: normalized.rejected,
        })
    }
}

fn span(records: &[NewHealthRecord]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = records.iter().map(|r| r.start_datetime).min()?;
    let end = records.iter().map(|r| r.end_datetime).max()?;
    Some((start, end))
}
