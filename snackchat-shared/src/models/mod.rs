pub mod channel;
pub mod chat;
pub mod errors;
pub mod push;

pub use channel::{
    CHAT_CHANNEL, ChannelGrant, ChannelGrantRequest, ChannelKind, ChannelStreamQuery,
    MESSAGE_EVENT, PresenceMember, RealtimeConnection,
};
pub use chat::{
    ChatMessage, DEFAULT_HISTORY_LIMIT, HistoryQuery, REQUIRED_MESSAGE_FIELDS, SendMessageRequest,
    SendMessageResponse, TrimResponse,
};
pub use errors::RelayErrorBody;
pub use push::{
    DispatchSummary, PushKeys, PushNotification, PushSubscribeResponse, PushSubscription,
};
