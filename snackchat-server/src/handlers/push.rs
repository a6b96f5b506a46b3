use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use shared::models::{
    DispatchSummary, PushNotification, PushSubscribeResponse, PushSubscription, RelayErrorBody,
};
use tracing::{info, instrument, warn};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};

pub const NOTIFY_SECRET_HEADER: &str = "x-cron-secret";

/// Registers a browser push subscription. Re-registering an endpoint is a no-op.
#[utoipa::path(
    post,
    path = "/api/push/subscriptions",
    request_body = PushSubscription,
    responses(
        (status = 201, description = "Subscription stored", body = PushSubscribeResponse),
        (status = 500, description = "Storage failure", body = RelayErrorBody)
    ),
    tag = "Push"
)]
#[instrument(skip_all, fields(endpoint = %subscription.endpoint))]
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(subscription): Json<PushSubscription>,
) -> AppResult<(StatusCode, Json<PushSubscribeResponse>)> {
    let added = state.push.subscribe(&subscription).await?;
    info!(added, "push subscription registered");
    Ok((
        StatusCode::CREATED,
        Json(PushSubscribeResponse {
            message: "Subscription saved".to_string(),
        }),
    ))
}

/// Sends a notification to every registered subscription.
///
/// Meant for scheduled jobs; the caller proves itself with the shared
/// secret in `x-cron-secret`.
#[utoipa::path(
    post,
    path = "/api/push/notify",
    request_body = PushNotification,
    params(("x-cron-secret" = String, Header, description = "Shared notify secret")),
    responses(
        (status = 200, description = "Per-outcome delivery counts", body = DispatchSummary),
        (status = 401, description = "Missing or wrong secret", body = RelayErrorBody),
        (status = 404, description = "Push notifications are disabled", body = RelayErrorBody)
    ),
    tag = "Push"
)]
#[instrument(skip_all)]
pub async fn notify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(notification): Json<PushNotification>,
) -> AppResult<Json<DispatchSummary>> {
    let push = &state.config().push;
    if !push.enabled {
        return Err(ApiError::not_found("Push notifications are disabled"));
    }

    let presented = headers
        .get(NOTIFY_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented.is_none() || presented != push.notify_secret.as_deref() {
        warn!("notify request with bad secret");
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    let summary = state.push.notify_all(&notification).await?;
    info!(
        delivered = summary.delivered,
        expired = summary.expired,
        failed = summary.failed,
        "notification fan-out complete"
    );
    Ok(Json(summary))
}
