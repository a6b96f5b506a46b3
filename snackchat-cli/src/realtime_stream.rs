//! Channel subscription over the relay's event stream.
//!
//! The relay exposes its in-process bus as server-sent events. A
//! [`SseBusConnection`] opens a transport session, asks for a grant, follows
//! the stream and decodes each event back into a [`RealtimeEvent`].

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::StreamExt;
use shared::{
    models::{ChannelGrantRequest, ChannelKind, ChannelStreamQuery},
    realtime::{BusConnection, BusConnectionError, RealtimeEvent},
    session::ClientError,
};
use tracing::{debug, warn};

use crate::relay_client::{EventByteStream, HttpRelayClient};

/// Accumulates stream bytes and yields complete `(event, data)` frames.
#[derive(Debug, Default)]
struct FrameParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                frames.extend(self.dispatch());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        frames
    }

    /// Ends the current frame. Frames without data are dropped.
    fn dispatch(&mut self) -> Option<(String, String)> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some((event.unwrap_or_else(|| "message".to_string()), data))
    }
}

/// A channel subscription followed over HTTP.
///
/// A closed or failed stream surfaces as [`RealtimeEvent::ConnectionLost`];
/// [`reconnect`](BusConnection::reconnect) opens a new session and stream.
pub struct SseBusConnection {
    client: HttpRelayClient,
    channel: String,
    user_id: String,
    nickname: String,
    socket_id: String,
    body: Option<EventByteStream>,
    frames: FrameParser,
    pending: VecDeque<RealtimeEvent>,
}

impl std::fmt::Debug for SseBusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseBusConnection")
            .field("channel", &self.channel)
            .field("socket_id", &self.socket_id)
            .field("streaming", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

impl SseBusConnection {
    /// Joins `channel` as `user_id`, shown as `nickname` on presence channels.
    ///
    /// # Errors
    ///
    /// Fails when the relay has no in-process bus, refuses the grant or
    /// cannot be reached.
    pub async fn open(
        client: HttpRelayClient,
        channel: &str,
        user_id: &str,
        nickname: &str,
    ) -> Result<Self, ClientError> {
        let mut connection = Self {
            client,
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            nickname: nickname.to_string(),
            socket_id: String::new(),
            body: None,
            frames: FrameParser::default(),
            pending: VecDeque::new(),
        };
        connection.subscribe().await?;
        Ok(connection)
    }

    #[must_use]
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    async fn subscribe(&mut self) -> Result<(), ClientError> {
        let socket_id = self.client.open_connection().await?;
        let grant = self
            .client
            .request_grant(&self.grant_request(&socket_id))
            .await?;
        let body = self
            .client
            .open_stream(&ChannelStreamQuery::new(&socket_id, &self.channel, &grant))
            .await?;

        debug!(%socket_id, channel = %self.channel, "following channel stream");
        self.socket_id = socket_id;
        self.frames = FrameParser::default();
        self.body = Some(body);
        Ok(())
    }

    fn grant_request(&self, socket_id: &str) -> ChannelGrantRequest {
        let mut request = ChannelGrantRequest {
            socket_id: Some(socket_id.to_string()),
            channel_name: Some(self.channel.clone()),
            ..ChannelGrantRequest::default()
        };
        if ChannelKind::of(&self.channel).is_presence() {
            request.user_id = Some(self.user_id.clone());
            request.user_info =
                Some(serde_json::json!({ "nickname": self.nickname }).to_string());
        }
        request
    }

    fn decode(&mut self, chunk: &[u8]) {
        for (name, data) in self.frames.push(chunk) {
            match RealtimeEvent::from_wire(&name, &data) {
                Ok(Some(event)) => self.pending.push_back(event),
                Ok(None) => debug!(event = %name, "ignoring unknown stream event"),
                Err(err) => warn!(event = %name, error = %err, "undecodable stream event"),
            }
        }
    }
}

#[async_trait]
impl BusConnection for SseBusConnection {
    /// Never returns `None`: a lost stream is reported as `ConnectionLost`
    /// until a reconnect succeeds.
    async fn next_event(&mut self) -> Option<RealtimeEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let Some(body) = self.body.as_mut() else {
                return Some(RealtimeEvent::ConnectionLost);
            };

            match body.next().await {
                Some(Ok(chunk)) => self.decode(&chunk),
                Some(Err(err)) => {
                    warn!(error = %err, "channel stream failed");
                    self.body = None;
                }
                None => {
                    debug!(socket_id = %self.socket_id, "channel stream closed");
                    self.body = None;
                }
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), BusConnectionError> {
        self.body = None;
        self.pending.clear();
        self.subscribe()
            .await
            .map_err(|err| BusConnectionError::Unavailable(err.to_string()))?;
        self.pending.push_back(RealtimeEvent::Reconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use shared::{
        events::EventBus,
        identity::StaticIdentity,
        models::{CHAT_CHANNEL, PresenceMember},
        session::{ChatClient, SessionState},
    };

    use super::*;
    use crate::relay_client::test_server::spawn_server;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut parser = FrameParser::default();

        assert!(parser.push(b"event: mess").is_empty());
        assert!(parser.push(b"age\ndata: {\"a\":").is_empty());
        let frames = parser.push(b"1}\r\n\r\n: keep-alive\n\nevent: x\ndata:2\n\n");

        assert_eq!(
            frames,
            vec![
                ("message".to_string(), "{\"a\":1}".to_string()),
                ("x".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = FrameParser::default();
        let frames = parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(frames, vec![("message".to_string(), "one\ntwo".to_string())]);
    }

    #[tokio::test]
    async fn grant_request_binds_presence_identity() {
        let (client, _bus, _) = spawn_server().await;
        let connection = SseBusConnection::open(client, CHAT_CHANNEL, "s-1", "Ana")
            .await
            .unwrap();

        let request = connection.grant_request("1.2");
        assert_eq!(request.user_id.as_deref(), Some("s-1"));
        assert_eq!(request.user_info.as_deref(), Some(r#"{"nickname":"Ana"}"#));

        let private = SseBusConnection {
            channel: "private-snacks".into(),
            ..connection
        };
        assert!(private.grant_request("1.2").user_id.is_none());
    }

    async fn connected_client(
        client: &HttpRelayClient,
        user_id: &str,
        nickname: &str,
    ) -> ChatClient<HttpRelayClient, SseBusConnection> {
        let bus = SseBusConnection::open(client.clone(), CHAT_CHANNEL, user_id, nickname)
            .await
            .unwrap();
        let mut chat = ChatClient::new(
            client.clone(),
            bus,
            Box::new(StaticIdentity::new(user_id, None)),
            Arc::new(EventBus::new()),
        );
        chat.start(nickname).unwrap();
        while chat.session().state() != SessionState::Connected {
            assert!(chat.pump().await.unwrap());
        }
        chat
    }

    #[tokio::test]
    async fn two_sessions_see_each_other_and_their_messages() {
        let (client, _bus, _) = spawn_server().await;

        let mut ana = connected_client(&client, "s-1", "Ana").await;
        let mut bo = connected_client(&client, "s-2", "Bo").await;
        assert_eq!(bo.session().roster().len(), 2);

        while ana.session().roster().len() < 2 {
            ana.pump().await.unwrap();
        }
        let sent = ana.send("  snack run?  ").await.unwrap();
        assert_eq!(sent.content, "  snack run?  ");

        while bo.session().timeline().is_empty() {
            bo.pump().await.unwrap();
        }
        assert_eq!(bo.session().timeline().messages(), [sent.clone()]);

        while ana.session().timeline().is_empty() {
            ana.pump().await.unwrap();
        }
        assert_eq!(ana.session().timeline().messages(), [sent]);
    }

    #[tokio::test]
    async fn lost_stream_reconnects_on_a_new_session() {
        let (client, bus, _) = spawn_server().await;
        let mut chat = connected_client(&client, "s-1", "Ana").await;
        let first = chat.bus().socket_id().to_string();

        bus.drop_connection(&first);
        tokio::time::timeout(Duration::from_secs(10), async {
            while chat.session().state() != SessionState::Disconnected {
                chat.pump().await.unwrap();
            }
            while chat.session().state() != SessionState::Connected {
                chat.pump().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_ne!(chat.bus().socket_id(), first);
        assert_eq!(
            bus.members(CHAT_CHANNEL),
            vec![PresenceMember::with_nickname("s-1", "Ana")]
        );
    }
}
