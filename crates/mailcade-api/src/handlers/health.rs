//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::auth::AppState;

/// Liveness probe
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Readiness probe: is the durable store reachable
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.db_pool.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
