#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    ChannelGrant, ChannelGrantRequest, ChatMessage, DispatchSummary, PushKeys, PushNotification,
    PushSubscribeResponse, PushSubscription, RealtimeConnection, RelayErrorBody, SendMessageRequest,
    SendMessageResponse, TrimResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Snackchat API",
        version = "1.0.0",
        description = "Chat relay, realtime channel grants and push notifications"
    ),
    paths(
        crate::handlers::chat::send_message,
        crate::handlers::chat::fetch_history,
        crate::handlers::chat::trim_history,
        crate::handlers::realtime::authorize_channel,
        crate::handlers::realtime::open_connection,
        crate::handlers::realtime::stream_channel,
        crate::handlers::push::subscribe,
        crate::handlers::push::notify,
    ),
    components(
        schemas(
            ChatMessage,
            SendMessageRequest,
            SendMessageResponse,
            TrimResponse,
            RelayErrorBody,
            ChannelGrantRequest,
            ChannelGrant,
            RealtimeConnection,
            PushSubscription,
            PushKeys,
            PushNotification,
            PushSubscribeResponse,
            DispatchSummary,
        )
    ),
    tags(
        (name = "Chat", description = "Message relay and history"),
        (name = "Realtime", description = "Channel grants and the in-process event stream"),
        (name = "Push", description = "Browser push notifications")
    )
)]
pub struct ApiDoc;
