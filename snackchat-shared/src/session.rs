//! Client-side chat session.
//!
//! [`ChatSession`] is the synchronous state machine: it owns the message
//! timeline, the presence roster and the send lock, and turns bus events
//! into follow-up [`SessionAction`]s. [`ChatClient`] drives a session over
//! a [`RelayApi`] and a [`BusConnection`].

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    events::EventBus,
    identity::IdentityProvider,
    models::{ChatMessage, DEFAULT_HISTORY_LIMIT, PresenceMember},
    realtime::{BusConnection, BusConnectionError, RealtimeEvent},
};

/// Fixed delay before a reconnect attempt. There is no backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Subscribing,
    Connected,
    /// Input is disabled until the bus reports a reconnection.
    Disconnected,
}

/// Follow-up work the driver must perform after applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    FetchHistory,
    ScheduleReconnect(Duration),
}

/// Observable changes, published on the session's [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    TimelineChanged,
    RosterChanged,
    /// Transient user-facing notification.
    Notice(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("display name must not be empty")]
    EmptyDisplayName,
    #[error("session already started")]
    AlreadyStarted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("not connected to the chat channel")]
    NotConnected,
    #[error("a message is already being sent")]
    SendPending,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Bus(#[from] BusConnectionError),
    #[error("relay rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("relay request failed: {0}")]
    Transport(String),
}

/// Messages in arrival order.
///
/// Live messages are appended unconditionally: no reordering by timestamp
/// and no deduplication by id, so a sender sees its own message once per
/// bus delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
}

impl Timeline {
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Presence members keyed by user id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceRoster {
    members: BTreeMap<String, PresenceMember>,
}

impl PresenceRoster {
    pub fn seed(&mut self, members: Vec<PresenceMember>) {
        self.members = members
            .into_iter()
            .map(|member| (member.user_id.clone(), member))
            .collect();
    }

    pub fn add(&mut self, member: PresenceMember) {
        self.members.insert(member.user_id.clone(), member);
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        self.members.remove(user_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Display names, falling back to the user id for members without one.
    #[must_use]
    pub fn nicknames(&self) -> Vec<&str> {
        self.members
            .values()
            .map(|member| member.nickname().unwrap_or(&member.user_id))
            .collect()
    }
}

/// Per-tab chat state machine.
pub struct ChatSession {
    state: SessionState,
    display_name: Option<String>,
    timeline: Timeline,
    roster: PresenceRoster,
    pending_send: Option<String>,
    history_requested: bool,
    events: Arc<EventBus<SessionEvent>>,
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("state", &self.state)
            .field("display_name", &self.display_name)
            .field("timeline", &self.timeline.len())
            .field("roster", &self.roster.len())
            .field("pending_send", &self.pending_send)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    #[must_use]
    pub fn new(events: Arc<EventBus<SessionEvent>>) -> Self {
        Self {
            state: SessionState::Uninitialized,
            display_name: None,
            timeline: Timeline::default(),
            roster: PresenceRoster::default(),
            pending_send: None,
            history_requested: false,
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    #[must_use]
    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.pending_send.is_some()
    }

    /// Records the display name and moves to `Subscribing`.
    ///
    /// # Errors
    ///
    /// Fails for blank names or when the session already left `Uninitialized`.
    pub fn begin(&mut self, display_name: &str) -> Result<(), SessionError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyDisplayName);
        }
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::AlreadyStarted);
        }

        self.display_name = Some(name.to_string());
        self.set_state(SessionState::Subscribing);
        Ok(())
    }

    /// Applies a bus event and returns the follow-up the driver must run.
    pub fn apply(&mut self, event: RealtimeEvent) -> Option<SessionAction> {
        match event {
            RealtimeEvent::SubscriptionSucceeded { members } => {
                self.roster.seed(members);
                self.events.emit(&SessionEvent::RosterChanged);
                self.set_state(SessionState::Connected);
                if self.history_requested {
                    None
                } else {
                    self.history_requested = true;
                    Some(SessionAction::FetchHistory)
                }
            }
            RealtimeEvent::SubscriptionError { reason } => {
                self.notice(format!("Could not join the chat: {reason}"));
                self.disconnect()
            }
            RealtimeEvent::ConnectionLost => self.disconnect(),
            RealtimeEvent::Reconnected => {
                if self.state == SessionState::Disconnected {
                    self.set_state(SessionState::Connected);
                }
                None
            }
            RealtimeEvent::Message(message) => {
                self.timeline.append(message);
                self.events.emit(&SessionEvent::TimelineChanged);
                None
            }
            RealtimeEvent::MemberAdded(member) => {
                self.roster.add(member);
                self.events.emit(&SessionEvent::RosterChanged);
                None
            }
            RealtimeEvent::MemberRemoved { user_id } => {
                if self.roster.remove(&user_id) {
                    self.events.emit(&SessionEvent::RosterChanged);
                }
                None
            }
        }
    }

    /// Installs a history fetch result. Failures leave the timeline as is.
    pub fn load_history(&mut self, result: Result<Vec<ChatMessage>, String>) {
        match result {
            Ok(messages) => {
                self.timeline.replace(messages);
                self.events.emit(&SessionEvent::TimelineChanged);
            }
            Err(reason) => self.notice(format!("Could not load chat history: {reason}")),
        }
    }

    /// Takes the send lock and builds the message to relay. The content is
    /// sent as typed; trimming only decides whether it is blank.
    ///
    /// # Errors
    ///
    /// Refuses blank content, sends while not connected and concurrent sends.
    pub fn begin_send(
        &mut self,
        content: &str,
        identity: &dyn IdentityProvider,
        now_millis: i64,
    ) -> Result<ChatMessage, SendError> {
        if content.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }
        if self.state != SessionState::Connected {
            return Err(SendError::NotConnected);
        }
        if self.pending_send.is_some() {
            return Err(SendError::SendPending);
        }

        let nickname = self
            .display_name
            .as_deref()
            .or_else(|| identity.display_name())
            .unwrap_or_default()
            .to_string();
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            sender: identity.sender_id().to_string(),
            nickname,
            timestamp: now_millis,
        };
        self.pending_send = Some(message.id.clone());
        Ok(message)
    }

    /// Releases the send lock. A failure raises a notice; nothing is retried.
    pub fn finish_send(&mut self, result: Result<(), String>) {
        self.pending_send = None;
        if let Err(reason) = result {
            self.notice(format!("Message not sent: {reason}"));
        }
    }

    fn disconnect(&mut self) -> Option<SessionAction> {
        self.set_state(SessionState::Disconnected);
        Some(SessionAction::ScheduleReconnect(RECONNECT_DELAY))
    }

    fn notice(&self, text: String) {
        self.events.emit(&SessionEvent::Notice(text));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.events.emit(&SessionEvent::StateChanged(state));
        }
    }
}

/// HTTP side of the chat relay, as seen by a client.
#[async_trait]
pub trait RelayApi: Send + Sync {
    async fn send_message(&self, message: &ChatMessage) -> Result<(), ClientError>;

    /// Most recent `limit` messages, oldest first.
    async fn fetch_history(&self, limit: usize) -> Result<Vec<ChatMessage>, ClientError>;
}

/// Async driver tying a [`ChatSession`] to the relay and the bus.
pub struct ChatClient<A, C> {
    api: A,
    bus: C,
    identity: Box<dyn IdentityProvider>,
    session: ChatSession,
    history_limit: usize,
}

impl<A, C> fmt::Debug for ChatClient<A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("session", &self.session)
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

impl<A, C> ChatClient<A, C>
where
    A: RelayApi,
    C: BusConnection,
{
    pub fn new(
        api: A,
        bus: C,
        identity: Box<dyn IdentityProvider>,
        events: Arc<EventBus<SessionEvent>>,
    ) -> Self {
        Self {
            api,
            bus,
            identity,
            session: ChatSession::new(events),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    #[must_use]
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Starts the session under `display_name`.
    ///
    /// # Errors
    ///
    /// See [`ChatSession::begin`].
    pub fn start(&mut self, display_name: &str) -> Result<(), ClientError> {
        self.session.begin(display_name)?;
        let name = self.session.display_name().unwrap_or_default().to_string();
        self.identity.set_display_name(name);
        info!(sender = %self.identity.sender_id(), "chat session subscribing");
        Ok(())
    }

    #[must_use]
    pub fn bus(&self) -> &C {
        &self.bus
    }

    /// Waits for the next bus event without applying it.
    ///
    /// Cancel safe as long as the bus connection's `next_event` is, so it
    /// can race user input in `tokio::select!`.
    pub async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.bus.next_event().await
    }

    /// Applies `event` and runs whatever follow-up it requires.
    ///
    /// # Errors
    ///
    /// Propagates reconnect failures. History fetch failures are reported
    /// through the session instead.
    pub async fn handle(&mut self, event: RealtimeEvent) -> Result<(), ClientError> {
        debug!(?event, "bus event");

        match self.session.apply(event) {
            Some(SessionAction::FetchHistory) => self.refresh_history().await,
            Some(SessionAction::ScheduleReconnect(delay)) => {
                warn!(delay_ms = delay.as_millis(), "bus connection lost, reconnecting");
                tokio::time::sleep(delay).await;
                self.bus.reconnect().await?;
            }
            None => {}
        }
        Ok(())
    }

    /// Waits for one bus event and runs whatever it requires.
    ///
    /// Returns `Ok(false)` once the subscription is closed.
    ///
    /// # Errors
    ///
    /// See [`Self::handle`].
    pub async fn pump(&mut self) -> Result<bool, ClientError> {
        let Some(event) = self.next_event().await else {
            return Ok(false);
        };
        self.handle(event).await?;
        Ok(true)
    }

    /// Sends `content` under the send lock.
    ///
    /// # Errors
    ///
    /// Fails when the session refuses the send or the relay call fails.
    pub async fn send(&mut self, content: &str) -> Result<ChatMessage, ClientError> {
        let now = chrono::Utc::now().timestamp_millis();
        let message = self
            .session
            .begin_send(content, self.identity.as_ref(), now)?;

        match self.api.send_message(&message).await {
            Ok(()) => {
                self.session.finish_send(Ok(()));
                Ok(message)
            }
            Err(err) => {
                self.session.finish_send(Err(err.to_string()));
                Err(err)
            }
        }
    }

    /// Replaces the timeline with a fresh history read.
    pub async fn refresh_history(&mut self) {
        let result = self
            .api
            .fetch_history(self.history_limit)
            .await
            .map_err(|err| err.to_string());
        self.session.load_history(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::StaticIdentity,
        models::CHAT_CHANNEL,
        realtime::{LocalBus, LocalSubscription},
    };
    use std::sync::Mutex;

    fn message(id: &str, timestamp: i64) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            content: format!("content {id}"),
            sender: "u1".into(),
            nickname: "Al".into(),
            timestamp,
        }
    }

    fn recording_session() -> (ChatSession, Arc<Mutex<Vec<SessionEvent>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |event: &SessionEvent| sink.lock().unwrap().push(event.clone()));
        (ChatSession::new(bus), seen)
    }

    fn connected_session() -> ChatSession {
        let mut session = ChatSession::new(Arc::new(EventBus::new()));
        session.begin("Al").unwrap();
        session.apply(RealtimeEvent::SubscriptionSucceeded {
            members: Vec::new(),
        });
        session
    }

    #[test]
    fn blank_display_name_is_rejected() {
        let mut session = ChatSession::new(Arc::new(EventBus::new()));
        assert_eq!(session.begin("   "), Err(SessionError::EmptyDisplayName));
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.begin("Al").unwrap();
        assert_eq!(session.begin("Bo"), Err(SessionError::AlreadyStarted));
    }

    #[test]
    fn subscription_ack_connects_and_requests_history_once() {
        let (mut session, seen) = recording_session();
        session.begin("Al").unwrap();
        assert_eq!(session.state(), SessionState::Subscribing);

        let action = session.apply(RealtimeEvent::SubscriptionSucceeded {
            members: vec![PresenceMember::with_nickname("u1", "Al")],
        });
        assert_eq!(action, Some(SessionAction::FetchHistory));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.roster().contains("u1"));
        assert!(
            seen.lock()
                .unwrap()
                .contains(&SessionEvent::StateChanged(SessionState::Connected))
        );

        let again = session.apply(RealtimeEvent::SubscriptionSucceeded {
            members: Vec::new(),
        });
        assert_eq!(again, None);
        assert!(session.roster().is_empty());
    }

    #[test]
    fn live_messages_append_without_reordering_or_dedupe() {
        let mut session = connected_session();
        session.load_history(Ok(vec![message("m1", 10), message("m2", 20)]));

        session.apply(RealtimeEvent::Message(message("m3", 5)));
        session.apply(RealtimeEvent::Message(message("m3", 5)));

        let ids: Vec<&str> = session
            .timeline()
            .messages()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m3"]);
    }

    #[test]
    fn failed_history_keeps_timeline_and_raises_notice() {
        let (mut session, seen) = recording_session();
        session.load_history(Err("boom".into()));

        assert!(session.timeline().is_empty());
        assert!(
            seen.lock()
                .unwrap()
                .iter()
                .any(|event| matches!(event, SessionEvent::Notice(text) if text.contains("boom")))
        );
    }

    #[test]
    fn roster_tracks_adds_and_removes_independently_of_timeline() {
        let mut session = connected_session();
        session.apply(RealtimeEvent::MemberAdded(PresenceMember::with_nickname(
            "u2", "Bo",
        )));
        session.apply(RealtimeEvent::MemberAdded(PresenceMember::with_nickname(
            "u3", "Cy",
        )));
        session.apply(RealtimeEvent::MemberRemoved {
            user_id: "u2".into(),
        });

        assert_eq!(session.roster().nicknames(), vec!["Cy"]);
        assert!(session.timeline().is_empty());
    }

    #[test]
    fn connection_loss_disables_input_and_schedules_fixed_reconnect() {
        let mut session = connected_session();
        let action = session.apply(RealtimeEvent::ConnectionLost);

        assert_eq!(
            action,
            Some(SessionAction::ScheduleReconnect(Duration::from_secs(3)))
        );
        assert_eq!(session.state(), SessionState::Disconnected);

        let identity = StaticIdentity::new("u1", None);
        assert_eq!(
            session.begin_send("hi", &identity, 1),
            Err(SendError::NotConnected)
        );

        assert_eq!(session.apply(RealtimeEvent::Reconnected), None);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn send_lock_blocks_duplicate_submission_until_resolved() {
        let mut session = connected_session();
        let identity = StaticIdentity::new("u1", None);

        let message = session.begin_send("  hi  ", &identity, 99).unwrap();
        assert_eq!(message.content, "  hi  ");
        assert_eq!(message.sender, "u1");
        assert_eq!(message.nickname, "Al");
        assert_eq!(message.timestamp, 99);
        assert!(session.is_sending());

        assert_eq!(
            session.begin_send("again", &identity, 100),
            Err(SendError::SendPending)
        );

        session.finish_send(Err("relay down".into()));
        assert!(!session.is_sending());
        assert!(session.begin_send("again", &identity, 101).is_ok());
    }

    #[test]
    fn whitespace_only_content_is_not_sent() {
        let mut session = connected_session();
        let identity = StaticIdentity::new("u1", None);
        assert_eq!(
            session.begin_send(" \n\t", &identity, 1),
            Err(SendError::EmptyContent)
        );
        assert!(!session.is_sending());
    }

    /// Relay stand-in that stores and fans out through a [`LocalBus`].
    #[derive(Clone, Default)]
    struct LoopbackRelay {
        bus: LocalBus,
        stored: Arc<Mutex<Vec<ChatMessage>>>,
        fail_history: bool,
    }

    #[async_trait]
    impl RelayApi for LoopbackRelay {
        async fn send_message(&self, message: &ChatMessage) -> Result<(), ClientError> {
            self.stored.lock().unwrap().push(message.clone());
            self.bus.publish_message(CHAT_CHANNEL, message);
            Ok(())
        }

        async fn fetch_history(&self, limit: usize) -> Result<Vec<ChatMessage>, ClientError> {
            if self.fail_history {
                return Err(ClientError::Transport("history unavailable".into()));
            }
            let stored = self.stored.lock().unwrap();
            let skip = stored.len().saturating_sub(limit);
            Ok(stored[skip..].to_vec())
        }
    }

    fn client(
        relay: &LoopbackRelay,
        user_id: &str,
        nickname: &str,
    ) -> ChatClient<LoopbackRelay, LocalSubscription> {
        let socket = relay.bus.connect();
        let subscription = relay.bus.subscribe(
            CHAT_CHANNEL,
            &socket,
            Some(PresenceMember::with_nickname(user_id, nickname)),
        );
        let mut client = ChatClient::new(
            relay.clone(),
            subscription,
            Box::new(StaticIdentity::new(user_id, None)),
            Arc::new(EventBus::new()),
        );
        client.start(nickname).unwrap();
        client
    }

    #[tokio::test]
    async fn sent_message_reaches_other_subscriber_verbatim() {
        let relay = LoopbackRelay::default();
        let mut alice = client(&relay, "u1", "Al");
        alice.pump().await.unwrap();
        let mut bob = client(&relay, "u2", "Bo");
        bob.pump().await.unwrap();

        let sent = alice.send("hi").await.unwrap();
        bob.pump().await.unwrap();

        assert_eq!(bob.session().timeline().messages(), &[sent]);
        assert_eq!(bob.session().roster().len(), 2);
    }

    #[tokio::test]
    async fn sender_sees_its_own_echo() {
        let relay = LoopbackRelay::default();
        let mut alice = client(&relay, "u1", "Al");
        alice.pump().await.unwrap();

        let sent = alice.send("hi").await.unwrap();
        alice.pump().await.unwrap();

        assert_eq!(alice.session().timeline().messages(), &[sent]);
        assert!(!alice.session().is_sending());
    }

    #[tokio::test]
    async fn failed_history_leaves_timeline_empty() {
        let relay = LoopbackRelay {
            fail_history: true,
            ..LoopbackRelay::default()
        };
        relay.stored.lock().unwrap().push(message("old", 1));
        let mut alice = client(&relay, "u1", "Al");
        alice.pump().await.unwrap();
        assert!(alice.session().timeline().is_empty());

        alice.refresh_history().await;
        assert!(alice.session().timeline().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_the_fixed_delay() {
        let relay = LoopbackRelay::default();
        let mut alice = client(&relay, "u1", "Al");
        alice.pump().await.unwrap();
        assert_eq!(alice.session().state(), SessionState::Connected);

        let started = tokio::time::Instant::now();
        let socket = alice.bus.socket_id().to_string();
        relay.bus.drop_connection(&socket);

        alice.pump().await.unwrap();
        assert!(started.elapsed() >= RECONNECT_DELAY);
        assert_eq!(alice.session().state(), SessionState::Disconnected);

        alice.pump().await.unwrap();
        assert_eq!(alice.session().state(), SessionState::Connected);
        alice.pump().await.unwrap();
        assert_eq!(relay.bus.subscriber_count(CHAT_CHANNEL), 1);
    }
}
