// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::response::IntoResponse;

#[tokio::test]
async fn envelope_shape() {
    let response = ApiError::not_found("no such job").into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["description"], "no such job");
}

#[test]
fn storage_duplicate_maps_to_conflict() {
    let err: ApiError = pio_storage::StorageError::DuplicateJob {
        unit: "u1".to_string(),
        experiment: "e1".to_string(),
        job_name: "stirring".to_string(),
    }
    .into();
    assert_eq!(err.status, StatusCode::CONFLICT);
}

#[test]
fn session_input_maps_to_400() {
    let err: ApiError = pio_calibration::SessionError::Input("bad number".to_string()).into();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.description, "bad number");
}

#[yare::parameterized(
    job_absent = { ErrorKind::JobAbsent, StatusCode::NOT_FOUND },
    duplicate  = { ErrorKind::DuplicateJob, StatusCode::CONFLICT },
    bus        = { ErrorKind::BusTransient, StatusCode::INTERNAL_SERVER_ERROR },
)]
fn kind_mapping(kind: ErrorKind, status: StatusCode) {
    assert_eq!(ApiError::from_kind(kind, "x").status, status);
}
