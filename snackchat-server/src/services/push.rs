//! Browser push notification fan-out.
//!
//! Every delivery produces a [`DeliveryReport`]; pruning subscriptions the
//! push service reported gone is a pure function over those reports
//! ([`expired_endpoints`]) followed by a single store call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use shared::models::{DispatchSummary, PushKeys, PushNotification, PushSubscription};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push subscription store failed: {0}")]
    Store(#[from] sqlx::Error),
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The push service no longer knows the subscription (404 or 410).
    Expired,
    Failed(String),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Delivered,
            404 | 410 => Self::Expired,
            other => Self::Failed(format!("push service responded with {other}")),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Expired => "expired",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub endpoint: String,
    pub outcome: DeliveryOutcome,
}

/// Endpoints to prune after a fan-out.
#[must_use]
pub fn expired_endpoints(reports: &[DeliveryReport]) -> Vec<String> {
    reports
        .iter()
        .filter(|report| report.outcome == DeliveryOutcome::Expired)
        .map(|report| report.endpoint.clone())
        .collect()
}

#[must_use]
pub fn summarize(reports: &[DeliveryReport]) -> DispatchSummary {
    reports
        .iter()
        .fold(DispatchSummary::default(), |mut summary, report| {
            match report.outcome {
                DeliveryOutcome::Delivered => summary.delivered += 1,
                DeliveryOutcome::Expired => summary.expired += 1,
                DeliveryOutcome::Failed(_) => summary.failed += 1,
            }
            summary
        })
}

#[async_trait]
pub trait PushSubscriptionStore: Send + Sync {
    /// Stores a subscription unless one with the same endpoint exists.
    /// Returns `true` when a new row was added.
    async fn upsert(&self, subscription: &PushSubscription) -> Result<bool, PushError>;

    async fn list(&self) -> Result<Vec<PushSubscription>, PushError>;

    async fn remove(&self, endpoints: &[String]) -> Result<u64, PushError>;
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
}

#[derive(Debug, Clone)]
pub struct PgPushSubscriptionStore {
    pool: PgPool,
}

impl PgPushSubscriptionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushSubscriptionStore for PgPushSubscriptionStore {
    async fn upsert(&self, subscription: &PushSubscription) -> Result<bool, PushError> {
        let result = sqlx::query(
            "INSERT INTO push_subscriptions (endpoint, p256dh, auth) VALUES ($1, $2, $3) \
             ON CONFLICT (endpoint) DO NOTHING",
        )
        .bind(&subscription.endpoint)
        .bind(&subscription.keys.p256dh)
        .bind(&subscription.keys.auth)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<PushSubscription>, PushError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT endpoint, p256dh, auth FROM push_subscriptions",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PushSubscription {
                endpoint: row.endpoint,
                keys: PushKeys {
                    p256dh: row.p256dh,
                    auth: row.auth,
                },
            })
            .collect())
    }

    async fn remove(&self, endpoints: &[String]) -> Result<u64, PushError> {
        if endpoints.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ANY($1)")
            .bind(endpoints)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPushSubscriptionStore {
    subscriptions: Arc<RwLock<Vec<PushSubscription>>>,
}

impl MemoryPushSubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PushSubscriptionStore for MemoryPushSubscriptionStore {
    async fn upsert(&self, subscription: &PushSubscription) -> Result<bool, PushError> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions
            .iter()
            .any(|existing| existing.endpoint == subscription.endpoint)
        {
            return Ok(false);
        }
        subscriptions.push(subscription.clone());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<PushSubscription>, PushError> {
        Ok(self.subscriptions.read().await.clone())
    }

    async fn remove(&self, endpoints: &[String]) -> Result<u64, PushError> {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|subscription| !endpoints.contains(&subscription.endpoint));
        Ok(u64::try_from(before - subscriptions.len()).unwrap_or(u64::MAX))
    }
}

/// Delivers one notification to one subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> DeliveryOutcome;
}

/// Posts the JSON payload to the subscription endpoint.
///
/// Payload encryption and VAPID signing are left to the push gateway the
/// endpoints point at.
#[derive(Debug, Clone)]
pub struct HttpPushSender {
    http: reqwest::Client,
    ttl_seconds: u32,
}

impl HttpPushSender {
    #[must_use]
    pub fn new(http: reqwest::Client, ttl_seconds: u32) -> Self {
        Self { http, ttl_seconds }
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> DeliveryOutcome {
        let response = self
            .http
            .post(&subscription.endpoint)
            .header("TTL", self.ttl_seconds.to_string())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await;

        match response {
            Ok(response) => DeliveryOutcome::from_status(response.status().as_u16()),
            Err(err) => DeliveryOutcome::Failed(err.to_string()),
        }
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn PushSubscriptionStore>,
    sender: Arc<dyn PushSender>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn PushSubscriptionStore>, sender: Arc<dyn PushSender>) -> Self {
        Self { store, sender }
    }

    /// Registers a subscription. Returns `true` when it was new.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn subscribe(&self, subscription: &PushSubscription) -> Result<bool, PushError> {
        self.store.upsert(subscription).await
    }

    /// Sends `notification` to every subscription concurrently, then prunes
    /// the subscriptions reported expired.
    ///
    /// # Errors
    ///
    /// Fails when the subscriptions cannot be listed or pruned. Individual
    /// delivery failures are counted, not raised.
    #[instrument(name = "push.notify_all", skip_all, fields(title = %notification.title), err)]
    pub async fn notify_all(
        &self,
        notification: &PushNotification,
    ) -> Result<DispatchSummary, PushError> {
        let payload = serde_json::to_string(notification)?;
        let subscriptions = self.store.list().await?;

        let reports: Vec<DeliveryReport> =
            join_all(subscriptions.iter().map(|subscription| async {
                let outcome = self.sender.send(subscription, &payload).await;
                if let DeliveryOutcome::Failed(reason) = &outcome {
                    warn!(endpoint = %subscription.endpoint, %reason, "push delivery failed");
                }
                metrics::counter!("push_deliveries_total", "outcome" => outcome.label())
                    .increment(1);
                DeliveryReport {
                    endpoint: subscription.endpoint.clone(),
                    outcome,
                }
            }))
            .await;

        let expired = expired_endpoints(&reports);
        if !expired.is_empty() {
            let removed = self.store.remove(&expired).await?;
            info!(removed, "pruned expired push subscriptions");
        }

        Ok(summarize(&reports))
    }
}
