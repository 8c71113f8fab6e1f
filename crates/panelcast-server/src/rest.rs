//! Snapshot REST endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use panelcast_core::SnapshotError;
use panelcast_telemetry::{names, MetricsCollector};
use serde::Serialize;
use tracing::warn;

use crate::server::AppState;

/// `{"error": {"code", "message"}}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// Error response with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<SnapshotError> for ApiError {
    fn from(e: SnapshotError) -> Self {
        let status = match e {
            SnapshotError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SnapshotError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.error_kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn respond<T: Serialize>(
    metrics: &MetricsCollector,
    endpoint: &'static str,
    result: Result<T, SnapshotError>,
) -> Response {
    let response = match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            warn!(endpoint, error_kind = e.error_kind(), error = %e, "snapshot query failed");
            ApiError::from(e).into_response()
        }
    };
    metrics.counter_inc(
        names::HTTP_REQUESTS_TOTAL,
        &[("endpoint", endpoint), ("status", response.status().as_str())],
        1,
    );
    response
}

/// GET /api/players
pub async fn players(State(state): State<AppState>) -> Response {
    let result = state.snapshots.players().await;
    respond(&state.metrics, "players", result)
}

/// GET /api/worlds
pub async fn worlds(State(state): State<AppState>) -> Response {
    let result = state.snapshots.worlds().await;
    respond(&state.metrics, "worlds", result)
}

/// GET /api/server/info
pub async fn server_info(State(state): State<AppState>) -> Response {
    let result = state.snapshots.server_info().await;
    respond(&state.metrics, "server_info", result)
}
