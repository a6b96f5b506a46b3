use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Browser push subscription as produced by the Push API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PushSubscription {
    /// Push service endpoint; unique per subscription.
    pub endpoint: String,
    pub keys: PushKeys,
}

/// Client keys attached to a push subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Notification payload understood by the service worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PushNotification {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    /// Page opened when the notification is clicked.
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_title() -> String {
    "New notification".to_string()
}

fn default_body() -> String {
    "(no content)".to_string()
}

fn default_icon() -> String {
    "/icon-192x192.png".to_string()
}

fn default_url() -> String {
    "/".to_string()
}

impl Default for PushNotification {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
            icon: default_icon(),
            url: default_url(),
        }
    }
}

/// Response to a subscription registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PushSubscribeResponse {
    pub message: String,
}

/// Per-outcome counts of a notification fan-out.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct DispatchSummary {
    pub delivered: usize,
    /// Subscriptions the push service reported gone; these were pruned.
    pub expired: usize,
    pub failed: usize,
}
