use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use search_core::config::SearchConfig;
use search_engine::Engine;
use search_federation::Coordinator;
use tokio::sync::RwLock;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: SearchConfig,
    /// Write-locked only around `start`/`stop`; every handler only ever
    /// needs a read lock since `Engine::search`/`make_index` take `&self`.
    pub engine: RwLock<Engine>,
    pub coordinator: Coordinator,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(crate::http::search::search_handler))
        .route("/usersearch", post(crate::http::usersearch::usersearch_handler))
        .route("/healthz", get(crate::http::health::health_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
