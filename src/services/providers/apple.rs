// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Apple Health export normalization (Health Auto Export JSON).
//!
//! Workouts come from `data.workouts[]`; sleep sessions from the
//! `sleep_analysis` entry of `data.metrics[]`. Other metrics are daily
//! aggregates, not records, and are not read.

use crate::models::{AggregateStats, HealthCategory, NewHealthRecord, ProviderName, Sample};
use crate::services::pipeline::MergePolicy;
use crate::services::providers::{
    canonical_type, collection, number, optional_number, parse_datetime, required_datetime,
    Normalized, PayloadError, ProviderHandler,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const WORKOUTS: &str = "workouts";
const METRICS: &str = "metrics";
const SLEEP_METRIC: &str = "sleep_analysis";
const SLEEP_COLLECTION: &str = "metrics.sleep_analysis";

#[derive(Debug, Clone, Default)]
pub struct AppleHandler {
    policy: MergePolicy,
}

impl AppleHandler {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }
}

impl ProviderHandler for AppleHandler {
    fn provider(&self) -> ProviderName {
        ProviderName::Apple
    }

    fn merge_policy(&self) -> MergePolicy {
        self.policy
    }

    fn normalize(&self, payload: &Value) -> Result<Normalized, PayloadError> {
        let root = payload.as_object().ok_or(PayloadError::NotAnObject)?;
        // Exports wrap everything in {"data": {...}}; accept it unwrapped too.
        let data = match root.get("data") {
            Some(Value::Object(inner)) => inner,
            Some(_) => return Err(PayloadError::NotAnObject),
            None => root,
        };

        let workouts = collection(data, WORKOUTS)?;
        let metrics = collection(data, METRICS)?;
        if workouts.is_none() && metrics.is_none() {
            return Err(PayloadError::NoCollections("workouts, metrics"));
        }

        let mut out = Normalized::default();
        for (index, item) in workouts.into_iter().flatten().enumerate() {
            out.push(WORKOUTS, index, self.workout(item));
        }
        for (index, item) in sleep_entries(metrics).enumerate() {
            out.push(SLEEP_COLLECTION, index, self.sleep(item));
        }
        Ok(out)
    }
}

impl AppleHandler {
    fn workout(&self, item: &Value) -> Result<NewHealthRecord, String> {
        let start = required_datetime(item, "start")?;
        let end = required_datetime(item, "end")?;

        let name = item
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or("missing required field 'name'")?;

        let duration_seconds = match item.get("duration") {
            Some(raw) => number(raw).ok_or_else(|| format!("invalid duration {}", raw))?,
            None => (end - start).num_milliseconds() as f64 / 1000.0,
        };

        let heart_rate = heart_rate(item, start, end).map_err(|e| format!("heart rate: {}", e))?;
        let steps = AggregateStats::from_samples(&series(item, "stepCount", "qty"), start, end);

        Ok(NewHealthRecord {
            provider_id: item
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            category: HealthCategory::Workout,
            record_type: Some(canonical_type(name)),
            source_name: self.source_name().to_string(),
            device_id: device(item),
            start_datetime: start,
            end_datetime: end,
            duration_seconds,
            heart_rate,
            steps,
        })
    }

    fn sleep(&self, item: &Value) -> Result<NewHealthRecord, String> {
        let start = first_datetime(item, &["sleepStart", "inBedStart", "startDate"])
            .ok_or("missing required field 'sleepStart'")?;
        let end = first_datetime(item, &["sleepEnd", "inBedEnd", "endDate"])
            .ok_or("missing required field 'sleepEnd'")?;

        // Totals are reported in hours.
        let duration_seconds = ["totalSleep", "asleep", "inBed"]
            .iter()
            .find_map(|field| optional_number(item, field))
            .map(|hours| hours * 3600.0)
            .unwrap_or_else(|| (end - start).num_milliseconds() as f64 / 1000.0);

        Ok(NewHealthRecord {
            provider_id: None,
            category: HealthCategory::Sleep,
            record_type: Some("sleep".to_string()),
            source_name: self.source_name().to_string(),
            device_id: device(item),
            start_datetime: start,
            end_datetime: end,
            duration_seconds,
            heart_rate: AggregateStats::default(),
            steps: AggregateStats::default(),
        })
    }
}

fn sleep_entries(metrics: Option<&Vec<Value>>) -> impl Iterator<Item = &Value> {
    metrics
        .into_iter()
        .flatten()
        .filter(|m| m.get("name").and_then(Value::as_str) == Some(SLEEP_METRIC))
        .filter_map(|m| m.get("data").and_then(Value::as_array))
        .flatten()
}

/// Per-minute heart rate from the sample series, or the workout-level
/// quantities when no series was exported.
fn heart_rate(
    item: &Value,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<AggregateStats, crate::models::health_record::AggregateError> {
    let samples: Vec<&Map<String, Value>> = item
        .get("heartRateData")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter(|s| {
            s.get("date")
                .and_then(Value::as_str)
                .and_then(parse_datetime)
                .is_some_and(|at| at >= start && at <= end)
        })
        .collect();

    if !samples.is_empty() {
        let field = |name: &str| -> Vec<f64> {
            samples
                .iter()
                .filter_map(|s| Some(s.get(name).and_then(number)? * per_minute(s.get("units"))))
                .collect()
        };
        let min = AggregateStats::from_values(field("Min")).min;
        let max = AggregateStats::from_values(field("Max")).max;
        let avg = AggregateStats::from_values(field("Avg")).avg;
        return AggregateStats::new(min, max, avg);
    }

    let quantity = |name: &str| -> Option<f64> {
        let q = item.get(name)?;
        Some(optional_number(q, "qty")? * per_minute(q.get("units")))
    };
    AggregateStats::new(
        quantity("minHeartRate"),
        quantity("maxHeartRate"),
        quantity("avgHeartRate"),
    )
}

/// Scale factor to beats per minute.
fn per_minute(units: Option<&Value>) -> f64 {
    match units.and_then(Value::as_str) {
        Some("count/s") => 60.0,
        _ => 1.0,
    }
}

/// `[{ "date": ..., <value_field>: ..., "source": ... }]` → samples.
fn series(item: &Value, field: &str, value_field: &str) -> Vec<Sample> {
    item.get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|point| {
            Some(Sample {
                device_id: point
                    .get("source")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                recorded_at: point.get("date").and_then(Value::as_str).and_then(parse_datetime)?,
                value: optional_number(point, value_field)?,
            })
        })
        .collect()
}

fn device(item: &Value) -> Option<String> {
    ["sourceName", "device", "source"]
        .iter()
        .find_map(|field| item.get(*field).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn first_datetime(item: &Value, fields: &[&str]) -> Option<DateTime<Utc>> {
    fields
        .iter()
        .find_map(|f| item.get(*f).and_then(Value::as_str).and_then(parse_datetime))
}
