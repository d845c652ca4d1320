//! Probe route definitions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use super::state::AppState;
use crate::archiver::{Health, HealthStatus};

pub fn probe_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let health = state.archiver.health();
    let code = match health.status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(health))
}

async fn info(State(state): State<AppState>) -> Json<Value> {
    match state.archiver.info() {
        Some(history) => Json(json!({ "reports archiver": history })),
        None => Json(json!({})),
    }
}
