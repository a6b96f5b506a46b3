//! Message persistence.
//!
//! The relay only needs three things from storage: insert a message keyed
//! by its id, read the newest rows, and delete rows older than a cutoff.

use std::sync::Arc;

use async_trait::async_trait;
use shared::models::ChatMessage;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::bootstrap;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message id {0} already exists")]
    DuplicateId(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Storage seam used by the relay service.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Up to `limit` messages, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    /// Deletes every message with `timestamp < cutoff_millis`.
    async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64, StoreError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, FromRow)]
struct ChatlogRow {
    message_id: String,
    content: String,
    sender: String,
    nickname: String,
    timestamp: i64,
}

impl From<ChatlogRow> for ChatMessage {
    fn from(row: ChatlogRow) -> Self {
        Self {
            id: row.message_id,
            content: row.content,
            sender: row.sender,
            nickname: row.nickname,
            timestamp: row.timestamp,
        }
    }
}

/// Postgres-backed store over the `chatlog` table.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO chatlog (message_id, content, sender, nickname, timestamp) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&message.id)
        .bind(&message.content)
        .bind(&message.sender)
        .bind(&message.nickname)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(message.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ChatlogRow>(
            "SELECT message_id, content, sender, nickname, timestamp \
             FROM chatlog ORDER BY timestamp DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM chatlog WHERE timestamp < $1")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        bootstrap::ensure_readiness(&self.pool).await?;
        Ok(())
    }
}

/// In-process store for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        if messages.iter().any(|existing| existing.id == message.id) {
            return Err(StoreError::DuplicateId(message.id.clone()));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self.messages.read().await.clone();
        // Ties on timestamp: last inserted counts as newest.
        messages.reverse();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64, StoreError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|message| message.timestamp >= cutoff_millis);
        Ok(u64::try_from(before - messages.len()).unwrap_or(u64::MAX))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
