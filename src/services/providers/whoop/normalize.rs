// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Whoop payload normalization.
//!
//! Input: `{"workouts": [...], "sleeps": [...]}` with v2 API records.
//! Durations come from the record window, or for sleep from
//! `stage_summary.total_in_bed_time_milli`. Energy (`kilojoule`) and strain
//! have no canonical field and are not carried.

use crate::models::{AggregateStats, HealthCategory, NewHealthRecord, ProviderName};
use crate::services::pipeline::MergePolicy;
use crate::services::providers::{
    canonical_type, collection, optional_number, required_datetime, required_id, Normalized,
    PayloadError, ProviderHandler,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

const WORKOUTS: &str = "workouts";
const SLEEPS: &str = "sleeps";

#[derive(Debug, Clone, Default)]
pub struct WhoopHandler {
    policy: MergePolicy,
}

impl WhoopHandler {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }
}

impl ProviderHandler for WhoopHandler {
    fn provider(&self) -> ProviderName {
        ProviderName::Whoop
    }

    fn merge_policy(&self) -> MergePolicy {
        self.policy
    }

    fn normalize(&self, payload: &Value) -> Result<Normalized, PayloadError> {
        let object = payload.as_object().ok_or(PayloadError::NotAnObject)?;
        let workouts = collection(object, WORKOUTS)?;
        let sleeps = collection(object, SLEEPS)?;
        if workouts.is_none() && sleeps.is_none() {
            return Err(PayloadError::NoCollections("workouts, sleeps"));
        }

        let mut out = Normalized::default();
        for (index, item) in workouts.into_iter().flatten().enumerate() {
            out.push(WORKOUTS, index, self.workout(item));
        }
        for (index, item) in sleeps.into_iter().flatten().enumerate() {
            out.push(SLEEPS, index, self.sleep(item));
        }
        Ok(out)
    }
}

impl WhoopHandler {
    fn workout(&self, item: &Value) -> Result<NewHealthRecord, String> {
        let (provider_id, start, end) = identity_and_window(item)?;
        let score = item.get("score");

        let heart_rate = AggregateStats::new(
            None,
            score.and_then(|s| optional_number(s, "max_heart_rate")),
            score.and_then(|s| optional_number(s, "average_heart_rate")),
        )
        .map_err(|e| format!("heart rate: {}", e))?;

        let record_type = item
            .get("sport_name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(canonical_type)
            .or_else(|| {
                item.get("sport_id")
                    .and_then(Value::as_i64)
                    .map(|id| sport_name(id).to_string())
            });

        Ok(NewHealthRecord {
            provider_id: Some(provider_id),
            category: HealthCategory::Workout,
            record_type,
            source_name: self.source_name().to_string(),
            device_id: None,
            start_datetime: start,
            end_datetime: end,
            duration_seconds: window_seconds(start, end),
            heart_rate,
            steps: AggregateStats::default(),
        })
    }

    fn sleep(&self, item: &Value) -> Result<NewHealthRecord, String> {
        let (provider_id, start, end) = identity_and_window(item)?;

        let in_bed_millis = item
            .get("score")
            .and_then(|s| s.get("stage_summary"))
            .and_then(|s| optional_number(s, "total_in_bed_time_milli"));
        let duration_seconds = match in_bed_millis {
            Some(ms) if ms >= 0.0 => ms / 1000.0,
            Some(ms) => return Err(format!("negative time in bed {}", ms)),
            None => window_seconds(start, end),
        };

        let is_nap = item.get("nap").and_then(Value::as_bool).unwrap_or(false);

        Ok(NewHealthRecord {
            provider_id: Some(provider_id),
            category: HealthCategory::Sleep,
            record_type: Some(if is_nap { "nap" } else { "sleep" }.to_string()),
            source_name: self.source_name().to_string(),
            device_id: None,
            start_datetime: start,
            end_datetime: end,
            duration_seconds,
            heart_rate: AggregateStats::default(),
            steps: AggregateStats::default(),
        })
    }
}

fn identity_and_window(item: &Value) -> Result<(String, DateTime<Utc>, DateTime<Utc>), String> {
    let id = required_id(item, "id")?;
    let start = required_datetime(item, "start")?;
    let end = required_datetime(item, "end")?;
    Ok((id, start, end))
}

fn window_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Whoop `sport_id` → workout type, for records without `sport_name`.
pub fn sport_name(sport_id: i64) -> &'static str {
    match sport_id {
        -1 => "activity",
        0 => "running",
        1 => "cycling",
        16 => "baseball",
        17 => "basketball",
        18 => "rowing",
        19 => "fencing",
        20 => "field_hockey",
        21 => "football",
        22 => "golf",
        24 => "ice_hockey",
        25 => "lacrosse",
        27 => "rugby",
        28 => "sailing",
        29 => "skiing",
        30 => "soccer",
        31 => "softball",
        32 => "squash",
        33 => "swimming",
        34 => "tennis",
        35 => "track_and_field",
        36 => "volleyball",
        37 => "water_polo",
        38 => "wrestling",
        39 => "boxing",
        42 => "dance",
        43 => "pilates",
        44 => "yoga",
        45 => "weightlifting",
        47 => "cross_country_skiing",
        48 => "functional_fitness",
        49 => "duathlon",
        51 => "gymnastics",
        52 => "hiking",
        53 => "horseback_riding",
        55 => "kayaking",
        56 => "martial_arts",
        57 => "mountain_biking",
        59 => "powerlifting",
        60 => "rock_climbing",
        61 => "paddleboarding",
        62 => "triathlon",
        63 => "walking",
        64 => "surfing",
        65 => "elliptical",
        66 => "stairmaster",
        70 => "meditation",
        _ => "other",
    }
}
