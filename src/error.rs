// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::services::oauth::OAuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Provider API error: {0}")]
    ProviderApi(String),

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::ProviderApi(msg) => {
                (StatusCode::BAD_GATEWAY, "provider_error", Some(msg.clone()))
            }
            AppError::OAuth(err) => oauth_status(err),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

fn oauth_status(err: &OAuthError) -> (StatusCode, &'static str, Option<String>) {
    match err {
        OAuthError::Exchange(msg) => (
            StatusCode::BAD_REQUEST,
            "oauth_exchange_failed",
            Some(msg.clone()),
        ),
        OAuthError::InvalidState(msg) => {
            (StatusCode::BAD_REQUEST, "invalid_state", Some(msg.clone()))
        }
        // Refresh failures surface as a reconnect prompt; stored data is kept.
        OAuthError::Refresh(_) | OAuthError::StaleRefreshToken => {
            (StatusCode::CONFLICT, "reconnect_required", Some(err.to_string()))
        }
        OAuthError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "provider_timeout", None),
        OAuthError::NotConnected(_) => {
            (StatusCode::NOT_FOUND, "not_connected", Some(err.to_string()))
        }
        OAuthError::UnsupportedProvider(_) => (
            StatusCode::NOT_FOUND,
            "unsupported_provider",
            Some(err.to_string()),
        ),
        OAuthError::Store(msg) => {
            tracing::error!(error = %msg, "Credential store error");
            (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
        }
        OAuthError::Internal(msg) => {
            tracing::error!(error = %msg, "OAuth engine error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
        }
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
