pub mod escrow;
pub mod transactions;
pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::check_health;
use crate::AppState;

/// 200 when the ledger store answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check_health(state.store.clone(), state.started_at).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
