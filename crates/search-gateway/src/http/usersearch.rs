use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use search_core::types::{SearchResp, UserSearchReq};
use tracing::warn;

use crate::app::AppState;
use crate::http::search::ErrorBody;

/// POST /usersearch — federated search across every cluster node that owns
/// one of the target user's channels.
pub async fn usersearch_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserSearchReq>,
) -> Result<Json<SearchResp>, (StatusCode, Json<ErrorBody>)> {
    state.coordinator.usersearch(req).await.map(Json).map_err(|e| {
        warn!(error = %e, "POST /usersearch failed");
        (
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorBody {
                error: e.to_string(),
                code: e.code(),
            }),
        )
    })
}
