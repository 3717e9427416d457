// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider handlers: raw provider payloads → canonical record candidates.

pub mod apple;
pub mod whoop;

pub use apple::AppleHandler;
pub use whoop::WhoopIntegration;

use crate::models::{NewHealthRecord, ProviderName};
use crate::services::oauth::{OAuthEngine, OAuthError};
use crate::services::pipeline::MergePolicy;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A record the handler could not map. The rest of the batch proceeds.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{collection}[{index}]: {reason}")]
pub struct NormalizationError {
    pub collection: &'static str,
    pub index: usize,
    pub reason: String,
}

/// The payload envelope itself is unreadable; nothing can be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("'{0}' must be an array")]
    NotAnArray(&'static str),

    #[error("payload contains none of: {0}")]
    NoCollections(&'static str),
}

/// Handler output: every input record lands in exactly one of the lists.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    /// In payload order.
    pub accepted: Vec<NewHealthRecord>,
    pub rejected: Vec<NormalizationError>,
}

impl Normalized {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    /// Validate and file one mapping result.
    pub(crate) fn push(
        &mut self,
        collection: &'static str,
        index: usize,
        result: Result<NewHealthRecord, String>,
    ) {
        match result.and_then(|record| record.validate().map(|()| record)) {
            Ok(record) => self.accepted.push(record),
            Err(reason) => self.rejected.push(NormalizationError {
                collection,
                index,
                reason,
            }),
        }
    }
}

/// Maps one provider's payloads onto the canonical schema. Pure: no I/O and
/// no access to stored state.
pub trait ProviderHandler: Send + Sync {
    fn provider(&self) -> ProviderName;

    /// Provenance tag written to every record; also the dedup scope.
    fn source_name(&self) -> &'static str {
        self.provider().as_str()
    }

    fn merge_policy(&self) -> MergePolicy;

    fn normalize(&self, payload: &Value) -> Result<Normalized, PayloadError>;
}

/// Configured providers for this deployment.
#[derive(Clone)]
pub struct ProviderRegistry {
    whoop: Option<WhoopIntegration>,
    apple: AppleHandler,
}

impl ProviderRegistry {
    pub fn new(whoop: Option<WhoopIntegration>, apple: AppleHandler) -> Self {
        Self { whoop, apple }
    }

    pub fn whoop(&self) -> Option<&WhoopIntegration> {
        self.whoop.as_ref()
    }

    pub fn apple(&self) -> &AppleHandler {
        &self.apple
    }

    /// Providers usable on this deployment.
    pub fn available(&self) -> impl Iterator<Item = ProviderName> + '_ {
        [ProviderName::Apple, ProviderName::Whoop]
            .into_iter()
            .filter(|p| self.handler(*p).is_some())
    }

    /// OAuth engine for `provider`, if it is an OAuth provider and configured.
    pub fn oauth(&self, provider: ProviderName) -> Result<&OAuthEngine, OAuthError> {
        let engine = match provider {
            ProviderName::Whoop => self.whoop.as_ref().map(|w| &w.engine),
            ProviderName::Apple => None,
        };
        engine.ok_or(OAuthError::UnsupportedProvider(provider))
    }

    pub fn handler(&self, provider: ProviderName) -> Option<&dyn ProviderHandler> {
        match provider {
            ProviderName::Whoop => self
                .whoop
                .as_ref()
                .map(|w| &w.handler as &dyn ProviderHandler),
            ProviderName::Apple => Some(&self.apple),
        }
    }
}

// ─── Field helpers shared by handlers ────────────────────────

/// Top-level array `name` of `object`, if present.
pub(crate) fn collection<'a>(
    object: &'a serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<Option<&'a Vec<Value>>, PayloadError> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(PayloadError::NotAnArray(name)),
    }
}

/// Required identifier that may arrive as a string or a number.
pub(crate) fn required_id(item: &Value, field: &str) -> Result<String, String> {
    match item.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(format!("missing required field '{}'", field)),
    }
}

pub(crate) fn required_datetime(item: &Value, field: &str) -> Result<DateTime<Utc>, String> {
    let raw = item
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required field '{}'", field))?;
    parse_datetime(raw).ok_or_else(|| format!("unparseable {} '{}'", field, raw))
}

/// RFC 3339, or the `2024-01-31 07:00:00 -0800` form used by health exports.
pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    // No offset: treat as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Number that may also be sent as a numeric string.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

pub(crate) fn optional_number(item: &Value, field: &str) -> Option<f64> {
    item.get(field).and_then(number)
}

/// "Functional Fitness" → "functional_fitness"
pub(crate) fn canonical_type(name: &str) -> String {
    name.trim()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}
