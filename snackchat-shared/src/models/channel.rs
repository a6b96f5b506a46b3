use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

/// Channel used for chat fan-out and presence tracking.
pub const CHAT_CHANNEL: &str = "presence-chat";

/// Event name chat messages are published under.
pub const MESSAGE_EVENT: &str = "message";

const PRESENCE_PREFIX: &str = "presence-";
const PRIVATE_PREFIX: &str = "private-";

/// Channel variants understood by the realtime bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    /// Tracks and reports subscriber identity in addition to delivering messages.
    Presence,
}

impl ChannelKind {
    /// Classifies a channel by its name prefix.
    #[must_use]
    pub fn of(channel_name: &str) -> Self {
        if channel_name.starts_with(PRESENCE_PREFIX) {
            Self::Presence
        } else if channel_name.starts_with(PRIVATE_PREFIX) {
            Self::Private
        } else {
            Self::Public
        }
    }

    #[must_use]
    pub const fn is_presence(self) -> bool {
        matches!(self, Self::Presence)
    }
}

/// Subscription grant request, sent as a form or JSON body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ChannelGrantRequest {
    /// Transport-level session identifier assigned by the bus.
    #[serde(default)]
    pub socket_id: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    /// Caller-supplied identity; presence channels only.
    #[serde(default)]
    pub user_id: Option<String>,
    /// JSON-encoded member info, containing at least `nickname`; presence channels only.
    #[serde(default)]
    pub user_info: Option<String>,
}

/// Signed, connection-and-channel-scoped subscription grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ChannelGrant {
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Transport session opened on the in-process bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RealtimeConnection {
    pub socket_id: String,
}

/// Query of the channel event stream: a grant plus the parameters it was
/// issued for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, IntoParams)]
pub struct ChannelStreamQuery {
    pub socket_id: Option<String>,
    pub channel_name: Option<String>,
    /// `auth` from the grant response.
    pub auth: Option<String>,
    /// `channel_data` from the grant response; presence channels only.
    pub channel_data: Option<String>,
}

impl ChannelStreamQuery {
    #[must_use]
    pub fn new(socket_id: &str, channel_name: &str, grant: &ChannelGrant) -> Self {
        Self {
            socket_id: Some(socket_id.to_string()),
            channel_name: Some(channel_name.to_string()),
            auth: Some(grant.auth.clone()),
            channel_data: grant.channel_data.clone(),
        }
    }
}

/// A member of a presence channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PresenceMember {
    pub user_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub user_info: Value,
}

impl PresenceMember {
    /// Builds a member whose info carries just a nickname.
    #[must_use]
    pub fn with_nickname(user_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: serde_json::json!({ "nickname": nickname.into() }),
        }
    }

    /// Display name advertised in the member info, if any.
    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.user_info.get("nickname").and_then(Value::as_str)
    }
}
