use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Number of messages returned by a history read when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Names of the fields a send request must carry, in reporting order.
pub const REQUIRED_MESSAGE_FIELDS: [&str; 4] = ["id", "content", "sender", "nickname"];

/// A single chat message as persisted and broadcast.
///
/// Messages are immutable once created. The identifier is generated by the
/// sending client and is unique within the message store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ChatMessage {
    /// Client-generated, globally unique identifier.
    pub id: String,
    /// Message text.
    pub content: String,
    /// Opaque per-browser sender identity. Not authenticated.
    pub sender: String,
    /// User-chosen display name. Neither unique nor authenticated.
    pub nickname: String,
    /// Creation time in epoch milliseconds. Absent on the wire reads as 0.
    #[serde(default)]
    pub timestamp: i64,
}

/// Wire shape of a send request.
///
/// Every field is optional so that validation can report exactly which
/// required fields are missing instead of failing on the first one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SendMessageRequest {
    /// Returns the required fields that are absent or empty, in the order
    /// of [`REQUIRED_MESSAGE_FIELDS`].
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let values = [&self.id, &self.content, &self.sender, &self.nickname];
        REQUIRED_MESSAGE_FIELDS
            .iter()
            .zip(values)
            .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Converts a validated request into a [`ChatMessage`].
    ///
    /// A client-supplied, non-zero timestamp wins; otherwise `now_millis`
    /// is used. Returns `None` when any required field is missing.
    #[must_use]
    pub fn into_message(self, now_millis: i64) -> Option<ChatMessage> {
        if !self.missing_fields().is_empty() {
            return None;
        }

        Some(ChatMessage {
            id: self.id?,
            content: self.content?,
            sender: self.sender?,
            nickname: self.nickname?,
            timestamp: self.timestamp.filter(|ts| *ts != 0).unwrap_or(now_millis),
        })
    }
}

impl From<ChatMessage> for SendMessageRequest {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: Some(message.id),
            content: Some(message.content),
            sender: Some(message.sender),
            nickname: Some(message.nickname),
            timestamp: Some(message.timestamp),
        }
    }
}

/// Acknowledgement returned by the send endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageResponse {
    pub success: bool,
}

/// Acknowledgement returned by the retention trim endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TrimResponse {
    pub success: bool,
}

/// Query parameters accepted by the history endpoint.
///
/// `limit` is kept as raw text so that an unparsable value falls back to the
/// default instead of rejecting the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Maximum number of messages to return (default 50).
    pub limit: Option<String>,
}

impl HistoryQuery {
    /// Resolves the effective limit, falling back to `default` for missing,
    /// unparsable or zero values.
    #[must_use]
    pub fn resolve_limit(&self, default: usize) -> usize {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(default)
    }
}
