// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Canonical health record model shared by every provider.
//!
//! Provider handlers produce [`NewHealthRecord`] candidates; the pipeline
//! turns them into owned [`HealthRecord`]s, and the API serves them as
//! [`HealthRecordResponse`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Canonical record category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCategory {
    Workout,
    Sleep,
    Recovery,
}

impl HealthCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            HealthCategory::Workout => "workout",
            HealthCategory::Sleep => "sleep",
            HealthCategory::Recovery => "recovery",
        }
    }
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workout" => Ok(HealthCategory::Workout),
            "sleep" => Ok(HealthCategory::Sleep),
            "recovery" => Ok(HealthCategory::Recovery),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

// ─── Aggregates ──────────────────────────────────────────────

/// Min/max/avg rollup of a time series over a record's window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    #[error("{0} is not a finite non-negative number")]
    InvalidValue(&'static str),

    #[error("aggregate ordering violated (min {min:?}, avg {avg:?}, max {max:?})")]
    Ordering {
        min: Option<f64>,
        avg: Option<f64>,
        max: Option<f64>,
    },
}

impl AggregateStats {
    /// Build a rollup, enforcing `min <= avg <= max` across whichever values are present.
    pub fn new(min: Option<f64>, max: Option<f64>, avg: Option<f64>) -> Result<Self, AggregateError> {
        for (name, value) in [("min", min), ("max", max), ("avg", avg)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(AggregateError::InvalidValue(name));
                }
            }
        }

        let ordered = |lo: Option<f64>, hi: Option<f64>| match (lo, hi) {
            (Some(lo), Some(hi)) => lo <= hi,
            _ => true,
        };

        if !(ordered(min, avg) && ordered(avg, max) && ordered(min, max)) {
            return Err(AggregateError::Ordering { min, avg, max });
        }

        Ok(Self { min, max, avg })
    }

    /// Roll up raw values. An empty input yields an empty rollup.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for v in values.into_iter().filter(|v| v.is_finite()) {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            min: Some(min),
            max: Some(max),
            avg: Some(sum / count as f64),
        }
    }

    /// Roll up the samples recorded inside `[start, end]`.
    pub fn from_samples(samples: &[Sample], start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::from_values(
            samples
                .iter()
                .filter(|s| s.recorded_at >= start && s.recorded_at <= end)
                .map(|s| s.value),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.avg.is_none()
    }
}

/// A single time-series point from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub device_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub value: f64,
}

/// Beats per minute.
pub type HeartRateSample = Sample;
/// Step count for the sample interval.
pub type StepSample = Sample;

// ─── Records ─────────────────────────────────────────────────

/// Candidate record produced by a provider handler, not yet owned by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHealthRecord {
    /// The provider's own identifier for this record, when it has one.
    pub provider_id: Option<String>,
    pub category: HealthCategory,
    pub record_type: Option<String>,
    pub source_name: String,
    pub device_id: Option<String>,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub duration_seconds: f64,
    pub heart_rate: AggregateStats,
    pub steps: AggregateStats,
}

impl NewHealthRecord {
    /// Check the record invariants. Handlers call this before accepting a record.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_datetime > self.end_datetime {
            return Err(format!(
                "start {} is after end {}",
                self.start_datetime, self.end_datetime
            ));
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            return Err(format!("invalid duration {}", self.duration_seconds));
        }
        AggregateStats::new(self.heart_rate.min, self.heart_rate.max, self.heart_rate.avg)
            .map_err(|e| format!("heart rate: {}", e))?;
        AggregateStats::new(self.steps.min, self.steps.max, self.steps.avg)
            .map_err(|e| format!("steps: {}", e))?;
        Ok(())
    }
}

/// Stored health record, exclusively owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_id: Option<String>,
    pub category: HealthCategory,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub source_name: String,
    pub device_id: Option<String>,
    pub duration_seconds: f64,
    #[serde(with = "firestore::serialize_as_timestamp")]
    pub start_datetime: DateTime<Utc>,
    #[serde(with = "firestore::serialize_as_timestamp")]
    pub end_datetime: DateTime<Utc>,
    pub heart_rate_min: Option<f64>,
    pub heart_rate_max: Option<f64>,
    pub heart_rate_avg: Option<f64>,
    pub steps_min: Option<f64>,
    pub steps_max: Option<f64>,
    pub steps_avg: Option<f64>,
}

impl HealthRecord {
    pub fn from_new(user_id: Uuid, record: NewHealthRecord) -> Self {
        let mut stored = Self {
            id: Uuid::new_v4(),
            user_id,
            provider_id: None,
            category: record.category,
            record_type: None,
            source_name: String::new(),
            device_id: None,
            duration_seconds: 0.0,
            start_datetime: record.start_datetime,
            end_datetime: record.end_datetime,
            heart_rate_min: None,
            heart_rate_max: None,
            heart_rate_avg: None,
            steps_min: None,
            steps_max: None,
            steps_avg: None,
        };
        stored.supersede_with(record);
        stored
    }

    /// Replace every observed field with a newer observation of the same
    /// record. Identity (`id`, `user_id`) is kept; `provider_id` is kept only
    /// when the newer observation does not carry one.
    pub fn supersede_with(&mut self, newer: NewHealthRecord) {
        self.provider_id = newer.provider_id.or_else(|| self.provider_id.take());
        self.category = newer.category;
        self.record_type = newer.record_type;
        self.source_name = newer.source_name;
        self.device_id = newer.device_id;
        self.duration_seconds = newer.duration_seconds;
        self.start_datetime = newer.start_datetime;
        self.end_datetime = newer.end_datetime;
        self.heart_rate_min = newer.heart_rate.min;
        self.heart_rate_max = newer.heart_rate.max;
        self.heart_rate_avg = newer.heart_rate.avg;
        self.steps_min = newer.steps.min;
        self.steps_max = newer.steps.max;
        self.steps_avg = newer.steps.avg;
    }

    pub fn heart_rate(&self) -> AggregateStats {
        AggregateStats {
            min: self.heart_rate_min,
            max: self.heart_rate_max,
            avg: self.heart_rate_avg,
        }
    }

    pub fn steps(&self) -> AggregateStats {
        AggregateStats {
            min: self.steps_min,
            max: self.steps_max,
            avg: self.steps_avg,
        }
    }
}

/// Health record as served by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HealthRecordResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_id: Option<String>,
    pub category: HealthCategory,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub source_name: String,
    pub device_id: Option<String>,
    pub duration_seconds: f64,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub heart_rate_min: Option<f64>,
    pub heart_rate_max: Option<f64>,
    pub heart_rate_avg: Option<f64>,
    pub steps_min: Option<f64>,
    pub steps_max: Option<f64>,
    pub steps_avg: Option<f64>,
}

impl From<HealthRecord> for HealthRecordResponse {
    fn from(r: HealthRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            provider_id: r.provider_id,
            category: r.category,
            record_type: r.record_type,
            source_name: r.source_name,
            device_id: r.device_id,
            duration_seconds: r.duration_seconds,
            start_datetime: r.start_datetime,
            end_datetime: r.end_datetime,
            heart_rate_min: r.heart_rate_min,
            heart_rate_max: r.heart_rate_max,
            heart_rate_avg: r.heart_rate_avg,
            steps_min: r.steps_min,
            steps_max: r.steps_max,
            steps_avg: r.steps_avg,
        }
    }
}

// ─── Query ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    StartDatetime,
    EndDatetime,
    DurationSeconds,
}

impl SortField {
    pub const fn field_name(self) -> &'static str {
        match self {
            SortField::StartDatetime => "start_datetime",
            SortField::EndDatetime => "end_datetime",
            SortField::DurationSeconds => "duration_seconds",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_QUERY_LIMIT: u32 = 20;
pub const MAX_QUERY_LIMIT: u32 = 100;

fn default_limit() -> u32 {
    DEFAULT_QUERY_LIMIT
}

/// Filters, sort and pagination for record listings.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_window"))]
pub struct HealthRecordQuery {
    pub category: Option<HealthCategory>,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub source_name: Option<String>,
    pub device_id: Option<String>,
    /// Only records starting at or after this instant.
    pub start_datetime: Option<DateTime<Utc>>,
    /// Only records ending at or before this instant.
    pub end_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Default for HealthRecordQuery {
    fn default() -> Self {
        Self {
            category: None,
            record_type: None,
            source_name: None,
            device_id: None,
            start_datetime: None,
            end_datetime: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

fn validate_window(query: &HealthRecordQuery) -> Result<(), ValidationError> {
    match (query.start_datetime, query.end_datetime) {
        (Some(start), Some(end)) if start > end => {
            Err(ValidationError::new("start_datetime_after_end_datetime"))
        }
        _ => Ok(()),
    }
}

impl HealthRecordQuery {
    /// Whether a record passes every filter in this query.
    pub fn matches(&self, record: &HealthRecord) -> bool {
        self.category.is_none_or(|c| record.category == c)
            && self
                .record_type
                .as_deref()
                .is_none_or(|t| record.record_type.as_deref() == Some(t))
            && self
                .source_name
                .as_deref()
                .is_none_or(|s| record.source_name == s)
            && self
                .device_id
                .as_deref()
                .is_none_or(|d| record.device_id.as_deref() == Some(d))
            && self.start_datetime.is_none_or(|s| record.start_datetime >= s)
            && self.end_datetime.is_none_or(|e| record.end_datetime <= e)
    }

    /// Ordering for this query's sort field and direction. Ties break on id
    /// in the same direction, matching the Firestore `(field, id)` ordering,
    /// so pages are stable and identical across stores.
    pub fn compare(&self, a: &HealthRecord, b: &HealthRecord) -> Ordering {
        let ordering = match self.sort_by {
            SortField::StartDatetime => a.start_datetime.cmp(&b.start_datetime),
            SortField::EndDatetime => a.end_datetime.cmp(&b.end_datetime),
            SortField::DurationSeconds => a.duration_seconds.total_cmp(&b.duration_seconds),
        }
        .then_with(|| a.id.cmp(&b.id));
        match self.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn record(hour: u32, category: HealthCategory, duration: f64) -> HealthRecord {
        HealthRecord::from_new(
            Uuid::new_v4(),
            NewHealthRecord {
                provider_id: None,
                category,
                record_type: Some("running".to_string()),
                source_name: "whoop".to_string(),
                device_id: None,
                start_datetime: at(hour),
                end_datetime: at(hour + 1),
                duration_seconds: duration,
                heart_rate: AggregateStats::default(),
                steps: AggregateStats::default(),
            },
        )
    }

    #[test]
    fn test_aggregate_ordering_enforced() {
        assert!(AggregateStats::new(Some(60.0), Some(180.0), Some(120.0)).is_ok());
        assert!(AggregateStats::new(None, Some(180.0), Some(120.0)).is_ok());
        assert!(matches!(
            AggregateStats::new(Some(60.0), Some(100.0), Some(120.0)),
            Err(AggregateError::Ordering { .. })
        ));
        assert!(matches!(
            AggregateStats::new(Some(-1.0), None, None),
            Err(AggregateError::InvalidValue("min"))
        ));
    }

    #[test]
    fn test_from_samples_uses_window_only() {
        let samples = vec![
            Sample { device_id: None, recorded_at: at(6), value: 200.0 },
            Sample { device_id: None, recorded_at: at(8), value: 100.0 },
            Sample { device_id: None, recorded_at: at(9), value: 140.0 },
        ];
        let stats = AggregateStats::from_samples(&samples, at(7), at(10));
        assert_eq!(stats.min, Some(100.0));
        assert_eq!(stats.max, Some(140.0));
        assert_eq!(stats.avg, Some(120.0));

        assert!(AggregateStats::from_samples(&samples, at(11), at(12)).is_empty());
    }

    #[test]
    fn test_new_record_rejects_inverted_window() {
        let mut candidate = NewHealthRecord {
            provider_id: None,
            category: HealthCategory::Sleep,
            record_type: None,
            source_name: "apple".to_string(),
            device_id: None,
            start_datetime: at(10),
            end_datetime: at(9),
            duration_seconds: 0.0,
            heart_rate: AggregateStats::default(),
            steps: AggregateStats::default(),
        };
        assert!(candidate.validate().is_err());

        candidate.end_datetime = at(11);
        assert!(candidate.validate().is_ok());
    }

    #[test]
    fn test_query_filters_and_sorts() {
        let records = vec![
            record(1, HealthCategory::Workout, 300.0),
            record(3, HealthCategory::Sleep, 100.0),
            record(5, HealthCategory::Workout, 200.0),
        ];

        let query = HealthRecordQuery {
            category: Some(HealthCategory::Workout),
            ..Default::default()
        };
        let mut hits: Vec<_> = records.iter().filter(|r| query.matches(r)).collect();
        hits.sort_by(|a, b| query.compare(a, b));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start_datetime, at(5));

        let by_duration = HealthRecordQuery {
            sort_by: SortField::DurationSeconds,
            sort_order: SortOrder::Asc,
            start_datetime: Some(at(2)),
            ..Default::default()
        };
        let mut hits: Vec<_> = records.iter().filter(|r| by_duration.matches(r)).collect();
        hits.sort_by(|a, b| by_duration.compare(a, b));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].duration_seconds, 100.0);
    }

    #[test]
    fn test_ties_break_on_id_in_sort_direction() {
        let mut low = record(4, HealthCategory::Workout, 600.0);
        let mut high = record(4, HealthCategory::Workout, 600.0);
        low.id = Uuid::from_u128(1);
        high.id = Uuid::from_u128(2);

        let desc = HealthRecordQuery::default();
        assert_eq!(desc.compare(&high, &low), Ordering::Less);

        let asc = HealthRecordQuery {
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        assert_eq!(asc.compare(&low, &high), Ordering::Less);
    }

    #[test]
    fn test_query_validation() {
        let too_big = HealthRecordQuery {
            limit: MAX_QUERY_LIMIT + 1,
            ..Default::default()
        };
        assert!(too_big.validate().is_err());

        let inverted = HealthRecordQuery {
            start_datetime: Some(at(5)),
            end_datetime: Some(at(4)),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        assert!(HealthRecordQuery::default().validate().is_ok());
    }
}
