use std::sync::Arc;

use axum::{Router, routing::post};

use crate::{app_state::AppState, handlers::push};

pub fn create_router_push() -> Router<Arc<AppState>> {
    Router::new()
        .route("/push/subscriptions", post(push::subscribe))
        .route("/push/notify", post(push::notify))
}
