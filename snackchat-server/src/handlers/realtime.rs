//! Channel grant and in-process bus endpoints.
//!
//! Browsers post the grant request as a form, the CLI as JSON; both are
//! accepted. Every response, failures included, carries open CORS headers
//! so the bus client library can call it from any origin.
//!
//! When the realtime provider is the in-process bus, clients open a
//! transport session with `connect`, obtain a grant for it, then follow the
//! channel as server-sent events on `stream`.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Form, Json,
    extract::{FromRequest, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt, future, stream};
use shared::{
    models::{
        ChannelGrant, ChannelGrantRequest, ChannelStreamQuery, RealtimeConnection, RelayErrorBody,
    },
    realtime::{BusConnection, LocalSubscription, RealtimeEvent},
};
use tracing::{info, instrument, warn};

use crate::{
    app_state::AppState,
    http::error::{AUTHORIZATION_FAILED, ApiError, STREAM_UNAVAILABLE},
};

const MIN_KEEPALIVE_SECONDS: u64 = 5;

fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn read_grant_request(request: Request) -> Result<ChannelGrantRequest, ApiError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let parsed = if is_json {
        Json::<ChannelGrantRequest>::from_request(request, &())
            .await
            .map(|Json(body)| body)
            .map_err(|rejection| rejection.body_text())
    } else {
        Form::<ChannelGrantRequest>::from_request(request, &())
            .await
            .map(|Form(body)| body)
            .map_err(|rejection| rejection.body_text())
    };

    parsed.map_err(|details| ApiError::forbidden(AUTHORIZATION_FAILED).with_details(details))
}

/// Signs a subscription grant for one connection and channel.
#[utoipa::path(
    post,
    path = "/api/realtime/auth",
    request_body(
        content = ChannelGrantRequest,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Signed grant", body = ChannelGrant),
        (status = 403, description = "Missing or invalid grant parameters", body = RelayErrorBody)
    ),
    tag = "Realtime"
)]
#[instrument(skip(state, request))]
pub async fn authorize_channel(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let outcome = match read_grant_request(request).await {
        Ok(grant_request) => state
            .authenticator
            .authorize(&grant_request)
            .map_err(ApiError::from),
        Err(err) => Err(err),
    };

    let response = match outcome {
        Ok(grant) => {
            metrics::counter!("channel_grants_total", "outcome" => "granted").increment(1);
            (StatusCode::OK, Json(grant)).into_response()
        }
        Err(err) => {
            metrics::counter!("channel_grants_total", "outcome" => "denied").increment(1);
            warn!(error = %err, "channel grant denied");
            err.into_response()
        }
    };

    with_cors(response)
}

/// CORS preflight for the grant endpoint.
pub async fn authorize_preflight() -> Response {
    with_cors(StatusCode::NO_CONTENT.into_response())
}

/// Opens a transport session on the in-process bus.
#[utoipa::path(
    post,
    path = "/api/realtime/connect",
    responses(
        (status = 200, description = "Session identifier to request grants for", body = RealtimeConnection),
        (status = 404, description = "The hosted bus is in use", body = RelayErrorBody)
    ),
    tag = "Realtime"
)]
pub async fn open_connection(State(state): State<Arc<AppState>>) -> Response {
    let response = match state.local_bus() {
        Some(bus) => {
            let socket_id = bus.connect();
            info!(%socket_id, "realtime connection opened");
            (StatusCode::OK, Json(RealtimeConnection { socket_id })).into_response()
        }
        None => ApiError::not_found(STREAM_UNAVAILABLE).into_response(),
    };
    with_cors(response)
}

/// Follows a channel as server-sent events.
///
/// The grant must match the connection and channel; presence grants join
/// the roster as the member they bind. Closing the stream leaves the
/// channel.
#[utoipa::path(
    get,
    path = "/api/realtime/stream",
    params(ChannelStreamQuery),
    responses(
        (status = 200, description = "`text/event-stream` of channel events", content_type = "text/event-stream"),
        (status = 403, description = "Missing or invalid grant", body = RelayErrorBody),
        (status = 404, description = "The hosted bus is in use", body = RelayErrorBody)
    ),
    tag = "Realtime"
)]
#[instrument(
    skip(state, query),
    fields(channel = query.channel_name.as_deref().unwrap_or_default())
)]
pub async fn stream_channel(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelStreamQuery>,
) -> Response {
    let Some(bus) = state.local_bus() else {
        return with_cors(ApiError::not_found(STREAM_UNAVAILABLE).into_response());
    };

    let grant = match state.authenticator.verify(&query) {
        Ok(grant) => grant,
        Err(err) => {
            metrics::counter!("channel_streams_total", "outcome" => "denied").increment(1);
            warn!(error = %err, "channel stream denied");
            return with_cors(ApiError::from(err).into_response());
        }
    };

    let subscription = bus.subscribe(&grant.channel, &grant.socket_id, grant.member);
    metrics::counter!("channel_streams_total", "outcome" => "opened").increment(1);
    info!(socket_id = %grant.socket_id, "channel stream opened");

    let interval = state
        .config()
        .realtime
        .keepalive_seconds
        .max(MIN_KEEPALIVE_SECONDS);
    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(interval))
        .text("keep-alive");

    with_cors(
        Sse::new(event_stream(subscription))
            .keep_alive(keepalive)
            .into_response(),
    )
}

/// Channel events until the bus drops the connection.
fn event_stream(
    subscription: LocalSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.next_event().await?;
        Some((event, subscription))
    })
    .take_while(|event| future::ready(*event != RealtimeEvent::ConnectionLost))
    .filter_map(|event| future::ready(sse_event(&event).map(Ok)))
}

fn sse_event(event: &RealtimeEvent) -> Option<Event> {
    match event.to_wire() {
        Ok(Some((name, data))) => Some(Event::default().event(name).data(data)),
        Ok(None) => None,
        Err(err) => {
            warn!(error = %err, "dropping unencodable channel event");
            None
        }
    }
}
