// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credential;
pub mod health_record;

pub use credential::{
    CredentialKey, CredentialStatus, ProviderCredential, ProviderName, UnknownProvider,
};
pub use health_record::{
    AggregateStats, HealthCategory, HealthRecord, HealthRecordQuery, HealthRecordResponse,
    HeartRateSample, NewHealthRecord, Sample, SortField, SortOrder, StepSample,
};
