use std::sync::Arc;

use axum::{Router, routing::get};

use crate::{app_state::AppState, handlers::chat};

pub fn create_router_chat() -> Router<Arc<AppState>> {
    Router::new().route(
        "/chat",
        get(chat::fetch_history)
            .post(chat::send_message)
            .delete(chat::trim_history),
    )
}
