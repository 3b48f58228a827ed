use std::sync::Arc;

use axum::{extract::State, Json};
use search_index::IndexHealth;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /healthz — liveness probe; reports index readiness without a search round-trip.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let engine = state.engine.read().await;
    let index = match engine.health() {
        Some(IndexHealth::Ready) => "ready",
        Some(IndexHealth::Unavailable) => "unavailable",
        None => "not_started",
    };

    Json(json!({
        "status": "ok",
        "index": index,
    }))
}
