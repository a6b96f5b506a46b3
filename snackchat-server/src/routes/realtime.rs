use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{app_state::AppState, handlers::realtime};

/// Grant and in-process bus endpoints. Mounted outside the global CORS
/// layer: the handlers set their own headers.
pub fn create_router_realtime() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/realtime/auth",
            post(realtime::authorize_channel).options(realtime::authorize_preflight),
        )
        .route("/api/realtime/connect", post(realtime::open_connection))
        .route("/api/realtime/stream", get(realtime::stream_channel))
}
