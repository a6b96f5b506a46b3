//! HTTP client for the relay API.

use std::pin::Pin;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use shared::{
    models::{
        ChannelGrant, ChannelGrantRequest, ChannelStreamQuery, ChatMessage, RealtimeConnection,
        RelayErrorBody, SendMessageRequest,
    },
    session::{ClientError, RelayApi},
};
use url::Url;

/// Raw body chunks of a channel event stream.
pub type EventByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

#[derive(Debug, Clone)]
pub struct HttpRelayClient {
    http: Client,
    base: Url,
}

impl HttpRelayClient {
    /// Client for the server at `base` (for example `http://localhost:8080/`).
    pub fn new(base: Url) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("snackchat-cli")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|err| ClientError::Transport(format!("invalid endpoint {path}: {err}")))
    }

    /// Deletes messages older than the server's retention window.
    pub async fn trim(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.endpoint("api/chat")?)
            .send()
            .await
            .map_err(transport)?;
        check(response).await.map(|_| ())
    }

    /// Requests a subscription grant for one connection and channel.
    pub async fn request_grant(
        &self,
        request: &ChannelGrantRequest,
    ) -> Result<ChannelGrant, ClientError> {
        let response = self
            .http
            .post(self.endpoint("api/realtime/auth")?)
            .form(request)
            .send()
            .await
            .map_err(transport)?;
        check(response).await?.json().await.map_err(transport)
    }

    /// Opens a transport session on the server's in-process bus.
    pub async fn open_connection(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.endpoint("api/realtime/connect")?)
            .send()
            .await
            .map_err(transport)?;
        let connection: RealtimeConnection =
            check(response).await?.json().await.map_err(transport)?;
        Ok(connection.socket_id)
    }

    /// Starts following a channel's event stream with a grant for it.
    pub async fn open_stream(
        &self,
        query: &ChannelStreamQuery,
    ) -> Result<EventByteStream, ClientError> {
        let mut url = self.endpoint("api/realtime/stream")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in [
                ("socket_id", &query.socket_id),
                ("channel_name", &query.channel_name),
                ("auth", &query.auth),
                ("channel_data", &query.channel_data),
            ] {
                if let Some(value) = value {
                    pairs.append_pair(name, value);
                }
            }
        }

        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(transport)?;
        let body = check(response)
            .await?
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Ok(Box::pin(body))
    }
}

#[async_trait]
impl RelayApi for HttpRelayClient {
    async fn send_message(&self, message: &ChatMessage) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint("api/chat")?)
            .json(&SendMessageRequest::from(message.clone()))
            .send()
            .await
            .map_err(transport)?;
        check(response).await.map(|_| ())
    }

    async fn fetch_history(&self, limit: usize) -> Result<Vec<ChatMessage>, ClientError> {
        let mut url = self.endpoint("api/chat")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        let response = self.http.get(url).send().await.map_err(transport)?;
        check(response).await?.json().await.map_err(transport)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn transport(err: reqwest::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

/// Turns a non-success response into [`ClientError::Rejected`], using the
/// relay's error body when it has one.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<RelayErrorBody>(&text) {
        Ok(RelayErrorBody {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(body) => body.error,
        Err(_) => text,
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay_client::test_server::spawn_server;
    use shared::models::PresenceMember;

    fn message(id: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            content: content.into(),
            sender: "s-1".into(),
            nickname: "Ana".into(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn send_then_fetch_round_trips_through_the_server() {
        let (client, _bus, _) = spawn_server().await;

        client.send_message(&message("m-1", "hello")).await.unwrap();
        client.send_message(&message("m-2", "again")).await.unwrap();

        let history = client.fetch_history(1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "m-2");

        client.trim().await.unwrap();
    }

    #[tokio::test]
    async fn validation_failure_surfaces_the_relay_message() {
        let (client, _bus, _) = spawn_server().await;

        let mut incomplete = message("m-1", "");
        incomplete.nickname.clear();
        let err = client.send_message(&incomplete).await.unwrap_err();

        match err {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(
                    message,
                    "Failed to send message: missing required message fields: content, nickname"
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn grant_request_is_signed_for_presence() {
        let (client, _bus, channel) = spawn_server().await;

        let grant = client
            .request_grant(&ChannelGrantRequest {
                socket_id: Some("123.456".into()),
                channel_name: Some(channel),
                user_id: Some("s-1".into()),
                user_info: Some(r#"{"nickname":"Ana"}"#.into()),
            })
            .await
            .unwrap();

        assert!(grant.channel_data.unwrap().contains("\"user_id\":\"s-1\""));
    }

    #[tokio::test]
    async fn denied_grant_is_rejected_with_403() {
        let (client, _bus, _) = spawn_server().await;

        let err = client
            .request_grant(&ChannelGrantRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = HttpRelayClient::new(Url::parse("http://127.0.0.1:9/").unwrap()).unwrap();
        let err = client.fetch_history(5).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn stream_opens_only_for_the_granted_connection() {
        let (client, bus, channel) = spawn_server().await;
        let socket_id = client.open_connection().await.unwrap();
        let grant = client
            .request_grant(&ChannelGrantRequest {
                socket_id: Some(socket_id.clone()),
                channel_name: Some(channel.clone()),
                user_id: Some("s-1".into()),
                user_info: Some(r#"{"nickname":"Ana"}"#.into()),
            })
            .await
            .unwrap();

        let err = client
            .open_stream(&ChannelStreamQuery::new("0.0", &channel, &grant))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Rejected { status: 403, .. }));

        let mut body = client
            .open_stream(&ChannelStreamQuery::new(&socket_id, &channel, &grant))
            .await
            .unwrap();
        let first = String::from_utf8(body.next().await.unwrap().unwrap()).unwrap();
        assert!(first.contains("event: subscription_succeeded"));
        assert_eq!(bus.members(&channel), vec![PresenceMember::with_nickname("s-1", "Ana")]);
    }
}
