//! HTTP handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::HealthState;

/// GET /live
pub async fn live(State(health): State<HealthState>) -> Response {
    match health.snapshot() {
        (true, _) => (StatusCode::OK, "alive").into_response(),
        (false, reason) => {
            debug!(?reason, "liveness probe failing");
            (StatusCode::INTERNAL_SERVER_ERROR, reason.unwrap_or_default()).into_response()
        }
    }
}
