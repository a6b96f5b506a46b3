//! Chat relay service: persist, then broadcast.
//!
//! The relay is the only point where durable storage and live fan-out meet.
//! A message is published only after it has been stored; a failed publish
//! still fails the call even though the message is already durable, and the
//! next history read will surface it.

use std::{fmt, sync::Arc};

use shared::models::{ChatMessage, SendMessageRequest};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::{message_store::MessageStore, realtime::RealtimeBus};

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing required message fields: {}", missing.join(", "))]
    Validation { missing: Vec<&'static str> },
    #[error("failed to store message: {0}")]
    Persistence(String),
    #[error("failed to broadcast message: {0}")]
    Broadcast(String),
}

impl RelayError {
    /// Metric label for the failure class.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid",
            Self::Persistence(_) => "persistence_error",
            Self::Broadcast(_) => "broadcast_error",
        }
    }
}

pub struct RelayService {
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn RealtimeBus>,
    channel: String,
    event: String,
    clock: Clock,
}

impl fmt::Debug for RelayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayService")
            .field("channel", &self.channel)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

impl RelayService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn RealtimeBus>,
        channel: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            channel: channel.into(),
            event: event.into(),
            clock: system_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn now_millis(&self) -> i64 {
        (self.clock)()
    }

    /// Validates, stores and publishes a message.
    ///
    /// The stored row carries the resolved timestamp; the bus receives the
    /// request exactly as sent. Returns the stored message.
    ///
    /// # Errors
    ///
    /// [`RelayError::Validation`] names every missing field; nothing is
    /// stored. [`RelayError::Persistence`] means nothing was published.
    /// [`RelayError::Broadcast`] means the message is stored but was not
    /// delivered live.
    #[instrument(
        name = "relay.persist_and_broadcast",
        skip(self, request),
        fields(message_id = request.id.as_deref().unwrap_or_default()),
        err
    )]
    pub async fn persist_and_broadcast(
        &self,
        request: SendMessageRequest,
    ) -> Result<ChatMessage, RelayError> {
        let missing = request.missing_fields();
        if !missing.is_empty() {
            return Err(RelayError::Validation { missing });
        }

        let payload = request.clone();
        let now = self.now_millis();
        let Some(message) = request.into_message(now) else {
            return Err(RelayError::Validation {
                missing: Vec::new(),
            });
        };

        self.store
            .insert(&message)
            .await
            .map_err(|err| RelayError::Persistence(err.to_string()))?;

        if let Err(err) = self.bus.publish(&self.channel, &self.event, &payload).await {
            warn!(error = %err, "message stored but not broadcast");
            return Err(RelayError::Broadcast(err.to_string()));
        }

        info!(channel = %self.channel, "message relayed");
        Ok(message)
    }

    /// The most recent `limit` messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Persistence`] when the store read fails.
    #[instrument(name = "relay.fetch_history", skip(self), err)]
    pub async fn fetch_history(&self, limit: usize) -> Result<Vec<ChatMessage>, RelayError> {
        let mut messages = self
            .store
            .recent(limit)
            .await
            .map_err(|err| RelayError::Persistence(err.to_string()))?;
        messages.reverse();
        Ok(messages)
    }

    /// Deletes messages older than `now - max_age_ms`. Live clients are not
    /// told. Returns the number of deleted messages.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Persistence`] when the delete fails.
    #[instrument(name = "relay.trim_retention", skip(self), err)]
    pub async fn trim_retention(&self, max_age_ms: u64) -> Result<u64, RelayError> {
        let max_age = i64::try_from(max_age_ms).unwrap_or(i64::MAX);
        let cutoff = self.now_millis().saturating_sub(max_age);
        let deleted = self
            .store
            .delete_older_than(cutoff)
            .await
            .map_err(|err| RelayError::Persistence(err.to_string()))?;
        info!(cutoff, deleted, "retention trim complete");
        Ok(deleted)
    }

    /// Readiness of the underlying store.
    ///
    /// # Errors
    ///
    /// Returns the store's probe failure.
    pub async fn ping(&self) -> Result<(), RelayError> {
        self.store
            .ping()
            .await
            .map_err(|err| RelayError::Persistence(err.to_string()))
    }
}
