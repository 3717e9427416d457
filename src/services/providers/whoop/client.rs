// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Whoop v2 data API client.

use crate::services::http::{check_response_json, ProviderApiError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

/// Whoop's maximum page size.
const PAGE_LIMIT: u32 = 25;
/// Stop following `next_token` after this many pages.
const MAX_PAGES: usize = 400;

pub const WORKOUT_PATH: &str = "/v2/activity/workout";
pub const SLEEP_PATH: &str = "/v2/activity/sleep";

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default, alias = "nextToken")]
    next_token: Option<String>,
}

#[derive(Clone)]
pub struct WhoopClient {
    http: reqwest::Client,
    base_url: String,
}

impl WhoopClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch every record of a collection, following pagination.
    pub async fn fetch_collection(
        &self,
        access_token: &str,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, ProviderApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let mut query = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(since) = since {
                query.push(("start", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
            }
            if let Some(token) = &next_token {
                query.push(("nextToken", token.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(access_token)
                .query(&query)
                .send()
                .await
                .map_err(ProviderApiError::from_transport)?;

            let page: Page = check_response_json(response).await?;
            tracing::debug!(path, page_number, count = page.records.len(), "Fetched Whoop page");
            records.extend(page.records);

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => return Ok(records),
            }
        }

        tracing::warn!(path, pages = MAX_PAGES, "Whoop pagination limit reached, truncating");
        Ok(records)
    }

    /// Workouts and sleeps in the shape [`super::WhoopHandler`] expects.
    pub async fn fetch_payload(
        &self,
        access_token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Value, ProviderApiError> {
        let workouts = self
            .fetch_collection(access_token, WORKOUT_PATH, since)
            .await?;
        let sleeps = self.fetch_collection(access_token, SLEEP_PATH, since).await?;

        Ok(json!({ "workouts": workouts, "sleeps": sleeps }))
    }
}
