//! Realtime bus publishers.
//!
//! [`PusherBus`] triggers events through the hosted bus REST API. The
//! in-process [`LocalBus`] from the shared crate is used in development and
//! tests, where server and subscribers live in the same process.

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::Serialize;
use shared::{
    config::server::RealtimeConfig,
    models::{ChatMessage, MESSAGE_EVENT, SendMessageRequest},
    realtime::LocalBus,
};
use thiserror::Error;
use tracing::{debug, instrument};

use super::authenticator::hmac_sha256_hex;

const AUTH_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("realtime bus request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("realtime bus rejected the event ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Publishing seam used by the relay service.
///
/// `payload` is the message as the client sent it; subscribers receive it
/// unchanged.
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &SendMessageRequest,
    ) -> Result<(), BusError>;
}

#[async_trait]
impl RealtimeBus for LocalBus {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &SendMessageRequest,
    ) -> Result<(), BusError> {
        if event == MESSAGE_EVENT {
            // Decoded the way a remote subscriber decodes the payload.
            let message: ChatMessage = serde_json::from_value(serde_json::to_value(payload)?)?;
            self.publish_message(channel, &message);
        } else {
            debug!(channel, event, "local bus only carries message events");
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct TriggerBody<'a> {
    name: &'a str,
    channels: [&'a str; 1],
    data: String,
}

/// Hosted bus REST client.
#[derive(Clone)]
pub struct PusherBus {
    http: reqwest::Client,
    api_base: String,
    app_id: String,
    key: String,
    secret: String,
}

impl std::fmt::Debug for PusherBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PusherBus")
            .field("api_base", &self.api_base)
            .field("app_id", &self.app_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl PusherBus {
    #[must_use]
    pub fn from_config(config: &RealtimeConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            api_base: config.api_base(),
            app_id: config.app_id.clone(),
            key: config.key.clone(),
            secret: config.secret.clone(),
        }
    }

    fn events_path(&self) -> String {
        format!("/apps/{}/events", self.app_id)
    }

    /// Signed query string for a `POST` of `body` to `path` at `timestamp`.
    fn signed_query(&self, path: &str, body: &str, timestamp: i64) -> String {
        let body_md5 = hex::encode(Md5::digest(body.as_bytes()));
        // Parameters are already in lexical order, as the signature requires.
        let query = format!(
            "auth_key={}&auth_timestamp={timestamp}&auth_version={AUTH_VERSION}&body_md5={body_md5}",
            self.key
        );
        let to_sign = format!("POST\n{path}\n{query}");
        let signature = hmac_sha256_hex(self.secret.as_bytes(), to_sign.as_bytes());
        format!("{query}&auth_signature={signature}")
    }
}

#[async_trait]
impl RealtimeBus for PusherBus {
    #[instrument(
        name = "realtime.publish",
        skip(self, payload),
        fields(message_id = payload.id.as_deref().unwrap_or_default()),
        err
    )]
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &SendMessageRequest,
    ) -> Result<(), BusError> {
        let body = serde_json::to_string(&TriggerBody {
            name: event,
            channels: [channel],
            data: serde_json::to_string(payload)?,
        })?;

        let path = self.events_path();
        let query = self.signed_query(&path, &body, chrono::Utc::now().timestamp());
        let url = format!("{}{path}?{query}", self.api_base);

        let response = self
            .http
            .post(url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "event triggered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(BusError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
