//! On-demand retention sweep.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub count: usize,
    pub expired_jobs: Vec<String>,
}

/// Remove expired jobs now.
pub async fn cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let report = state.sweeper.sweep().await;

    Json(CleanupResponse {
        message: format!("Cleaned up {} expired jobs", report.count()),
        count: report.count(),
        expired_jobs: report.removed.into_iter().map(|id| id.0).collect(),
    })
}
