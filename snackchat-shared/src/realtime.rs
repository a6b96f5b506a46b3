//! Realtime bus vocabulary and the in-process bus.
//!
//! [`RealtimeEvent`] is what a subscriber observes on a channel, whichever
//! bus delivers it. [`LocalBus`] is an in-process stand-in for the hosted
//! bus: it keeps presence membership per channel and fans messages out to
//! every current subscriber, the publisher's own subscription included.
//! Events cross HTTP as server-sent events named by [`wire`].

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{ChannelKind, ChatMessage, PresenceMember};

/// Events delivered to a channel subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Subscription acknowledged; carries the membership snapshot for
    /// presence channels (empty otherwise).
    SubscriptionSucceeded { members: Vec<PresenceMember> },
    SubscriptionError { reason: String },
    MemberAdded(PresenceMember),
    MemberRemoved { user_id: String },
    Message(ChatMessage),
    ConnectionLost,
    Reconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusConnectionError {
    #[error("realtime bus is unavailable: {0}")]
    Unavailable(String),
}

/// Client side of a live channel subscription.
#[async_trait]
pub trait BusConnection: Send {
    /// Waits for the next event. `None` once the subscription is closed.
    async fn next_event(&mut self) -> Option<RealtimeEvent>;

    /// Re-establishes the connection after a loss.
    async fn reconnect(&mut self) -> Result<(), BusConnectionError>;
}

/// Event names of a channel subscription streamed over HTTP.
pub mod wire {
    pub const SUBSCRIPTION_SUCCEEDED: &str = "subscription_succeeded";
    pub const SUBSCRIPTION_ERROR: &str = "subscription_error";
    pub const MEMBER_ADDED: &str = "member_added";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const MESSAGE: &str = "message";
}

#[derive(Serialize, Deserialize)]
struct MemberSnapshot {
    members: Vec<PresenceMember>,
}

#[derive(Serialize, Deserialize)]
struct SubscriptionFailure {
    reason: String,
}

#[derive(Serialize, Deserialize)]
struct MemberDeparture {
    user_id: String,
}

impl RealtimeEvent {
    /// Event name and JSON data for the HTTP stream.
    ///
    /// Connection-level events (`ConnectionLost`, `Reconnected`) describe the
    /// transport itself and have no wire form.
    ///
    /// # Errors
    ///
    /// Fails only if a payload cannot be serialized.
    pub fn to_wire(&self) -> Result<Option<(&'static str, String)>, serde_json::Error> {
        let encoded = match self {
            Self::SubscriptionSucceeded { members } => (
                wire::SUBSCRIPTION_SUCCEEDED,
                serde_json::to_string(&MemberSnapshot {
                    members: members.clone(),
                })?,
            ),
            Self::SubscriptionError { reason } => (
                wire::SUBSCRIPTION_ERROR,
                serde_json::to_string(&SubscriptionFailure {
                    reason: reason.clone(),
                })?,
            ),
            Self::MemberAdded(member) => (wire::MEMBER_ADDED, serde_json::to_string(member)?),
            Self::MemberRemoved { user_id } => (
                wire::MEMBER_REMOVED,
                serde_json::to_string(&MemberDeparture {
                    user_id: user_id.clone(),
                })?,
            ),
            Self::Message(message) => (wire::MESSAGE, serde_json::to_string(message)?),
            Self::ConnectionLost | Self::Reconnected => return Ok(None),
        };
        Ok(Some(encoded))
    }

    /// Decodes a streamed event. Unknown names yield `None`.
    ///
    /// # Errors
    ///
    /// Fails when `data` does not match the shape of the named event.
    pub fn from_wire(name: &str, data: &str) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            wire::SUBSCRIPTION_SUCCEEDED => {
                let MemberSnapshot { members } = serde_json::from_str(data)?;
                Self::SubscriptionSucceeded { members }
            }
            wire::SUBSCRIPTION_ERROR => {
                let SubscriptionFailure { reason } = serde_json::from_str(data)?;
                Self::SubscriptionError { reason }
            }
            wire::MEMBER_ADDED => Self::MemberAdded(serde_json::from_str(data)?),
            wire::MEMBER_REMOVED => {
                let MemberDeparture { user_id } = serde_json::from_str(data)?;
                Self::MemberRemoved { user_id }
            }
            wire::MESSAGE => Self::Message(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

struct Subscriber {
    member: Option<PresenceMember>,
    sender: mpsc::UnboundedSender<RealtimeEvent>,
}

#[derive(Default)]
struct BusState {
    channels: HashMap<String, BTreeMap<String, Subscriber>>,
}

impl BusState {
    fn members(&self, channel: &str) -> Vec<PresenceMember> {
        let mut seen = BTreeMap::new();
        if let Some(subscribers) = self.channels.get(channel) {
            for member in subscribers.values().filter_map(|s| s.member.as_ref()) {
                seen.entry(member.user_id.clone())
                    .or_insert_with(|| member.clone());
            }
        }
        seen.into_values().collect()
    }

    fn user_connected(&self, channel: &str, user_id: &str) -> bool {
        self.channels.get(channel).is_some_and(|subscribers| {
            subscribers
                .values()
                .any(|s| s.member.as_ref().is_some_and(|m| m.user_id == user_id))
        })
    }

    fn broadcast(&self, channel: &str, except: Option<&str>, event: &RealtimeEvent) -> usize {
        let Some(subscribers) = self.channels.get(channel) else {
            return 0;
        };

        subscribers
            .iter()
            .filter(|(socket_id, _)| Some(socket_id.as_str()) != except)
            .filter(|(_, subscriber)| subscriber.sender.send(event.clone()).is_ok())
            .count()
    }

    fn remove(&mut self, channel: &str, socket_id: &str) -> Option<Subscriber> {
        let removed = self.channels.get_mut(channel)?.remove(socket_id)?;
        if let Some(member) = removed.member.as_ref() {
            if !self.user_connected(channel, &member.user_id) {
                self.broadcast(
                    channel,
                    None,
                    &RealtimeEvent::MemberRemoved {
                        user_id: member.user_id.clone(),
                    },
                );
            }
        }
        Some(removed)
    }
}

/// In-process realtime bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
    next_socket: Arc<AtomicU64>,
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus").finish_non_exhaustive()
    }
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transport connection and returns its session identifier.
    #[must_use]
    pub fn connect(&self) -> String {
        let n = self.next_socket.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}.{n}", std::process::id())
    }

    /// Subscribes a connection to a channel.
    ///
    /// The new subscriber receives the membership snapshot (itself included)
    /// and, for presence channels, every other subscriber receives a
    /// `MemberAdded` unless the same user was already connected.
    #[must_use]
    pub fn subscribe(
        &self,
        channel: &str,
        socket_id: &str,
        member: Option<PresenceMember>,
    ) -> LocalSubscription {
        let receiver = self.attach(channel, socket_id, member.clone(), false);
        LocalSubscription {
            bus: self.clone(),
            channel: channel.to_string(),
            socket_id: socket_id.to_string(),
            member,
            receiver,
        }
    }

    /// Delivers a chat message to every current subscriber of `channel`.
    /// Returns the number of subscribers reached.
    pub fn publish_message(&self, channel: &str, message: &ChatMessage) -> usize {
        let delivered =
            self.lock()
                .broadcast(channel, None, &RealtimeEvent::Message(message.clone()));
        debug!(channel, message_id = %message.id, delivered, "local bus publish");
        delivered
    }

    /// Removes a subscription, announcing the departure to the others.
    pub fn unsubscribe(&self, channel: &str, socket_id: &str) {
        self.lock().remove(channel, socket_id);
    }

    /// Simulates a transport failure: every subscription on `socket_id` is
    /// detached and told the connection was lost.
    pub fn drop_connection(&self, socket_id: &str) {
        let mut state = self.lock();
        let channels: Vec<String> = state
            .channels
            .iter()
            .filter(|(_, subscribers)| subscribers.contains_key(socket_id))
            .map(|(name, _)| name.clone())
            .collect();

        for channel in channels {
            if let Some(subscriber) = state.remove(&channel, socket_id) {
                let _ = subscriber.sender.send(RealtimeEvent::ConnectionLost);
            }
        }
    }

    /// Current members of a presence channel, deduplicated by user id.
    #[must_use]
    pub fn members(&self, channel: &str) -> Vec<PresenceMember> {
        self.lock().members(channel)
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().channels.get(channel).map_or(0, BTreeMap::len)
    }

    fn attach(
        &self,
        channel: &str,
        socket_id: &str,
        member: Option<PresenceMember>,
        reconnecting: bool,
    ) -> mpsc::UnboundedReceiver<RealtimeEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let presence = ChannelKind::of(channel).is_presence();
        let member = member.filter(|_| presence);

        let mut state = self.lock();
        let announce = member
            .as_ref()
            .filter(|m| !state.user_connected(channel, &m.user_id))
            .cloned();

        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(
                socket_id.to_string(),
                Subscriber {
                    member,
                    sender: sender.clone(),
                },
            );

        if reconnecting {
            let _ = sender.send(RealtimeEvent::Reconnected);
        }
        let members = if presence {
            state.members(channel)
        } else {
            Vec::new()
        };
        let _ = sender.send(RealtimeEvent::SubscriptionSucceeded { members });

        if let Some(member) = announce {
            state.broadcast(channel, Some(socket_id), &RealtimeEvent::MemberAdded(member));
        }

        receiver
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A live subscription on a [`LocalBus`]. Dropping it unsubscribes.
pub struct LocalSubscription {
    bus: LocalBus,
    channel: String,
    socket_id: String,
    member: Option<PresenceMember>,
    receiver: mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl std::fmt::Debug for LocalSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSubscription")
            .field("channel", &self.channel)
            .field("socket_id", &self.socket_id)
            .finish_non_exhaustive()
    }
}

impl LocalSubscription {
    #[must_use]
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<RealtimeEvent> {
        self.receiver.try_recv().ok()
    }
}

#[async_trait]
impl BusConnection for LocalSubscription {
    async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.receiver.recv().await
    }

    async fn reconnect(&mut self) -> Result<(), BusConnectionError> {
        self.bus.unsubscribe(&self.channel, &self.socket_id);
        self.socket_id = self.bus.connect();
        self.receiver = self
            .bus
            .attach(&self.channel, &self.socket_id, self.member.clone(), true);
        Ok(())
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.channel, &self.socket_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CHAT_CHANNEL;

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            content: "hi".into(),
            sender: "u1".into(),
            nickname: "Al".into(),
            timestamp: 1,
        }
    }

    #[test]
    fn subscriber_receives_snapshot_including_itself() {
        let bus = LocalBus::new();
        let socket = bus.connect();
        let mut sub = bus.subscribe(
            CHAT_CHANNEL,
            &socket,
            Some(PresenceMember::with_nickname("u1", "Al")),
        );

        match sub.try_next() {
            Some(RealtimeEvent::SubscriptionSucceeded { members }) => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].user_id, "u1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn existing_members_see_arrivals_and_departures() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe(
            CHAT_CHANNEL,
            &bus.connect(),
            Some(PresenceMember::with_nickname("u1", "Al")),
        );
        let _ = first.try_next();

        let second = bus.subscribe(
            CHAT_CHANNEL,
            &bus.connect(),
            Some(PresenceMember::with_nickname("u2", "Bo")),
        );
        assert_eq!(
            first.try_next(),
            Some(RealtimeEvent::MemberAdded(PresenceMember::with_nickname(
                "u2", "Bo"
            )))
        );

        drop(second);
        assert_eq!(
            first.try_next(),
            Some(RealtimeEvent::MemberRemoved {
                user_id: "u2".into()
            })
        );
    }

    #[test]
    fn publish_reaches_the_publisher_too() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe(CHAT_CHANNEL, &bus.connect(), None);
        let mut b = bus.subscribe(CHAT_CHANNEL, &bus.connect(), None);
        let _ = a.try_next();
        let _ = b.try_next();

        assert_eq!(bus.publish_message(CHAT_CHANNEL, &message("m1")), 2);
        assert_eq!(a.try_next(), Some(RealtimeEvent::Message(message("m1"))));
        assert_eq!(b.try_next(), Some(RealtimeEvent::Message(message("m1"))));
    }

    #[test]
    fn second_connection_of_same_user_is_not_announced() {
        let bus = LocalBus::new();
        let mut watcher = bus.subscribe(
            CHAT_CHANNEL,
            &bus.connect(),
            Some(PresenceMember::with_nickname("u9", "Watcher")),
        );
        let _ = watcher.try_next();

        let _tab_one = bus.subscribe(
            CHAT_CHANNEL,
            &bus.connect(),
            Some(PresenceMember::with_nickname("u1", "Al")),
        );
        let _tab_two = bus.subscribe(
            CHAT_CHANNEL,
            &bus.connect(),
            Some(PresenceMember::with_nickname("u1", "Al")),
        );

        assert!(matches!(
            watcher.try_next(),
            Some(RealtimeEvent::MemberAdded(_))
        ));
        assert_eq!(watcher.try_next(), None);
        assert_eq!(bus.members(CHAT_CHANNEL).len(), 2);
    }

    #[test]
    fn public_channels_carry_no_membership() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe(
            "chat",
            &bus.connect(),
            Some(PresenceMember::with_nickname("u1", "Al")),
        );
        assert_eq!(
            sub.try_next(),
            Some(RealtimeEvent::SubscriptionSucceeded {
                members: Vec::new()
            })
        );
        assert!(bus.members("chat").is_empty());
    }

    #[test]
    fn streamed_events_decode_to_what_was_sent() {
        let events = [
            RealtimeEvent::SubscriptionSucceeded {
                members: vec![PresenceMember::with_nickname("u1", "Al")],
            },
            RealtimeEvent::MemberAdded(PresenceMember::with_nickname("u2", "Bo")),
            RealtimeEvent::MemberRemoved {
                user_id: "u2".into(),
            },
            RealtimeEvent::Message(message("m1")),
        ];

        for event in events {
            let (name, data) = event.to_wire().unwrap().unwrap();
            assert_eq!(RealtimeEvent::from_wire(name, &data).unwrap(), Some(event));
        }
    }

    #[test]
    fn transport_events_stay_off_the_wire() {
        assert_eq!(RealtimeEvent::ConnectionLost.to_wire().unwrap(), None);
        assert_eq!(RealtimeEvent::Reconnected.to_wire().unwrap(), None);
        assert_eq!(RealtimeEvent::from_wire("ping", "{}").unwrap(), None);
        assert!(RealtimeEvent::from_wire(wire::MESSAGE, "{\"id\":5}").is_err());
    }

    #[tokio::test]
    async fn dropped_connection_reports_loss_then_reconnects() {
        let bus = LocalBus::new();
        let socket = bus.connect();
        let mut sub = bus.subscribe(
            CHAT_CHANNEL,
            &socket,
            Some(PresenceMember::with_nickname("u1", "Al")),
        );
        let _ = sub.next_event().await;

        bus.drop_connection(&socket);
        assert_eq!(sub.next_event().await, Some(RealtimeEvent::ConnectionLost));
        assert_eq!(bus.subscriber_count(CHAT_CHANNEL), 0);

        sub.reconnect().await.unwrap();
        assert_ne!(sub.socket_id(), socket);
        assert_eq!(sub.next_event().await, Some(RealtimeEvent::Reconnected));
        assert!(matches!(
            sub.next_event().await,
            Some(RealtimeEvent::SubscriptionSucceeded { .. })
        ));
        assert_eq!(bus.subscriber_count(CHAT_CHANNEL), 1);
    }
}
