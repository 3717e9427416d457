// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod health_records;
pub mod http;
pub mod kms;
pub mod oauth;
pub mod pipeline;
pub mod providers;
pub mod sync;

pub use health_records::HealthRecordService;
pub use kms::KmsService;
pub use oauth::{OAuthEngine, OAuthError};
pub use pipeline::{IngestReport, MergePolicy, NormalizationPipeline};
pub use providers::{AppleHandler, ProviderHandler, ProviderRegistry, WhoopIntegration};
pub use sync::{SyncReport, SyncService};
