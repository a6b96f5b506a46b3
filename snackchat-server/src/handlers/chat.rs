use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use shared::models::{
    ChatMessage, HistoryQuery, RelayErrorBody, SendMessageRequest, SendMessageResponse,
    TrimResponse,
};
use tracing::{error, info, instrument};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult, HISTORY_FAILED, SEND_FAILED, TRIM_FAILED},
};

/// Persists a chat message and broadcasts it to the chat channel.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message stored and broadcast", body = SendMessageResponse),
        (status = 500, description = "Unreadable body, missing fields, storage or broadcast failure", body = RelayErrorBody)
    ),
    tag = "Chat"
)]
#[instrument(skip(state, body))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            metrics::counter!("chat_messages_relayed_total", "outcome" => "invalid").increment(1);
            error!(error = %rejection, "unreadable send request");
            return Err(ApiError::internal_server_error(SEND_FAILED)
                .with_details(rejection.body_text()));
        }
    };

    match state.relay.persist_and_broadcast(request).await {
        Ok(message) => {
            metrics::counter!("chat_messages_relayed_total", "outcome" => "ok").increment(1);
            info!(message_id = %message.id, "chat message relayed");
            Ok((StatusCode::OK, Json(SendMessageResponse { success: true })))
        }
        Err(err) => {
            metrics::counter!("chat_messages_relayed_total", "outcome" => err.outcome())
                .increment(1);
            error!(error = %err, "chat message not relayed");
            Err(ApiError::relay(SEND_FAILED, &err))
        }
    }
}

/// Returns the most recent messages, oldest first.
#[utoipa::path(
    get,
    path = "/api/chat",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Recent messages, oldest first", body = [ChatMessage]),
        (status = 500, description = "Storage failure", body = RelayErrorBody)
    ),
    tag = "Chat"
)]
#[instrument(skip(state))]
pub async fn fetch_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let limit = query.resolve_limit(state.config().chat.default_history_limit);
    metrics::counter!("chat_history_reads_total").increment(1);

    state.relay.fetch_history(limit).await.map(Json).map_err(|err| {
        error!(error = %err, limit, "chat history read failed");
        ApiError::relay(HISTORY_FAILED, &err)
    })
}

/// Deletes messages older than the retention window.
#[utoipa::path(
    delete,
    path = "/api/chat",
    responses(
        (status = 200, description = "Old messages deleted", body = TrimResponse),
        (status = 500, description = "Storage failure", body = RelayErrorBody)
    ),
    tag = "Chat"
)]
#[instrument(skip(state))]
pub async fn trim_history(State(state): State<Arc<AppState>>) -> AppResult<Json<TrimResponse>> {
    match state
        .relay
        .trim_retention(state.config().chat.retention_ms)
        .await
    {
        Ok(deleted) => {
            metrics::counter!("chat_retention_trimmed_total").increment(deleted);
            Ok(Json(TrimResponse { success: true }))
        }
        Err(err) => {
            error!(error = %err, "retention trim failed");
            Err(ApiError::internal_server_error(TRIM_FAILED))
        }
    }
}
