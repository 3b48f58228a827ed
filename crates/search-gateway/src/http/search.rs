use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use search_core::types::{SearchReq, SearchResp};
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// POST /search — local full-text search, no federation.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchReq>,
) -> Result<Json<SearchResp>, (StatusCode, Json<ErrorBody>)> {
    let engine = state.engine.read().await;
    engine.search(&req).map(Json).map_err(|e| {
        warn!(error = %e, "POST /search failed");
        (
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorBody {
                error: e.to_string(),
                code: e.code(),
            }),
        )
    })
}
