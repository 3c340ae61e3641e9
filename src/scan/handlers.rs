use super::producer::ScanProducer;
use super::protocol::*;
use super::status::StatusService;
use super::types::{ScanId, ScanRecord, ScanRequest, ScanStatus};
use crate::error::ScanError;

use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;

/// Builds the public scan API.
pub fn router(producer: Arc<ScanProducer>, status: Arc<StatusService>) -> Router {
    Router::new()
        .route(ENDPOINT_SUBMIT_SCAN, post(handle_submit_scan))
        .route(ENDPOINT_SCAN, get(handle_get_scan))
        .route(ENDPOINT_SCAN_STATUS, get(handle_get_scan_status))
        .route(ENDPOINT_SCAN_RESULT, get(handle_get_scan_result))
        .layer(Extension(producer))
        .layer(Extension(status))
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        match self {
            ScanError::Submission { scan_id, reason } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SubmitScanResponse {
                    scan_id,
                    status: ScanStatus::Error,
                    error: Some(format!("task submission failed: {}", reason)),
                }),
            )
                .into_response(),
            other => {
                let status = match &other {
                    ScanError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    ScanError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    Json(ErrorResponse {
                        error: other.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

pub async fn handle_submit_scan(
    Extension(producer): Extension<Arc<ScanProducer>>,
    payload: Result<Json<SubmitScanRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::debug!("Rejected scan request body: {}", rejection.body_text());
            return ScanError::InvalidRequest(rejection.body_text()).into_response();
        }
    };

    match producer
        .submit(ScanRequest::new(req.target, req.scan_type))
        .await
    {
        Ok(scan_id) => (
            StatusCode::ACCEPTED,
            Json(SubmitScanResponse {
                scan_id,
                status: ScanStatus::Pending,
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Scan submission failed: {}", e);
            e.into_response()
        }
    }
}

pub async fn handle_get_scan_status(
    Extension(status): Extension<Arc<StatusService>>,
    Path(scan_id_str): Path<String>,
) -> Result<Json<ScanStatusResponse>, ScanError> {
    let scan_id = ScanId(scan_id_str);
    let current = status.get_status(&scan_id).await?;

    tracing::debug!("Scan status query: {} -> {}", scan_id, current);
    Ok(Json(ScanStatusResponse {
        scan_id,
        status: current,
    }))
}

pub async fn handle_get_scan_result(
    Extension(status): Extension<Arc<StatusService>>,
    Path(scan_id_str): Path<String>,
) -> Result<Json<ScanResultResponse>, ScanError> {
    let scan_id = ScanId(scan_id_str);
    let result = status.get_result(&scan_id).await?;

    Ok(Json(ScanResultResponse { scan_id, result }))
}

pub async fn handle_get_scan(
    Extension(status): Extension<Arc<StatusService>>,
    Path(scan_id_str): Path<String>,
) -> Result<Json<ScanRecord>, ScanError> {
    let record = status.get_record(&ScanId(scan_id_str)).await?;
    Ok(Json(record))
}
