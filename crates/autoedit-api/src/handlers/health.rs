//! Service info and health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Service info returned at the root.
#[derive(Serialize)]
pub struct IndexResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

/// API info.
pub async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        name: "Auto Video Editor API",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub jobs: usize,
    pub running_jobs: usize,
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        jobs: state.store.len().await,
        running_jobs: state.executor.running_jobs(),
    })
}
