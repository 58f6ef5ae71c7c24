// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `{error, description}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pio_core::error::ErrorKind;
use serde_json::json;

/// An API failure carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub description: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &str, description: impl Into<String>) -> Self {
        Self {
            status,
            error: error.to_string(),
            description: description.into(),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", description)
    }

    pub fn conflict(description: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", description)
    }

    pub fn from_kind(kind: ErrorKind, description: impl Into<String>) -> Self {
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, kind.as_str(), description)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error,
            "description": self.description,
        }));
        (self.status, body).into_response()
    }
}

impl From<pio_storage::StorageError> for ApiError {
    fn from(e: pio_storage::StorageError) -> Self {
        match &e {
            pio_storage::StorageError::DuplicateJob { .. } => Self::conflict(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<pio_calibration::StoreError> for ApiError {
    fn from(e: pio_calibration::StoreError) -> Self {
        match &e {
            pio_calibration::StoreError::NotFound { .. } => Self::not_found(e.to_string()),
            pio_calibration::StoreError::AlreadyExists { .. } => Self::conflict(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<pio_calibration::SessionError> for ApiError {
    fn from(e: pio_calibration::SessionError) -> Self {
        match &e {
            pio_calibration::SessionError::Input(description) => {
                Self::new(StatusCode::BAD_REQUEST, "session_input", description.clone())
            }
            pio_calibration::SessionError::UnknownStep(_) => Self::not_found(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
