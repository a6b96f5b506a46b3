use std::sync::Arc;

use shared::{
    config::server::{Config, RealtimeProvider, StoreBackend},
    realtime::LocalBus,
};
use tracing::warn;

use crate::services::{
    ChannelAuthenticator, HmacGrantSigner, MemoryMessageStore, MessageStore,
    NotificationDispatcher, PgMessageStore, PusherBus, RealtimeBus, RelayService,
    push::{
        HttpPushSender, MemoryPushSubscriptionStore, PgPushSubscriptionStore,
        PushSubscriptionStore,
    },
};

type Stores = (Arc<dyn MessageStore>, Arc<dyn PushSubscriptionStore>);

fn memory_stores() -> Stores {
    (
        Arc::new(MemoryMessageStore::new()),
        Arc::new(MemoryPushSubscriptionStore::new()),
    )
}

/// Shared state handed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) relay: Arc<RelayService>,
    pub(crate) authenticator: Arc<ChannelAuthenticator>,
    pub(crate) push: Arc<NotificationDispatcher>,
    /// Present when the realtime provider is the in-process bus.
    pub(crate) local_bus: Option<LocalBus>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        relay: Arc<RelayService>,
        authenticator: Arc<ChannelAuthenticator>,
        push: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            config,
            relay,
            authenticator,
            push,
            local_bus: None,
        }
    }

    #[must_use]
    pub fn with_local_bus(mut self, bus: LocalBus) -> Self {
        self.local_bus = Some(bus);
        self
    }

    /// Wires the collaborators named by `config`.
    ///
    /// `pool` must be present when the store backend is Postgres; without
    /// it a warning is logged and the in-memory stores are used.
    #[must_use]
    pub fn from_config(config: Arc<Config>, pool: Option<sqlx::PgPool>) -> Self {
        let http = reqwest::Client::new();

        let (message_store, push_store): Stores = match (&config.store.backend, pool) {
            (StoreBackend::Postgres, Some(pool)) => (
                Arc::new(PgMessageStore::new(pool.clone())),
                Arc::new(PgPushSubscriptionStore::new(pool)),
            ),
            (StoreBackend::Postgres, None) => {
                warn!("postgres store configured without a pool; using in-memory stores");
                memory_stores()
            }
            (StoreBackend::Memory, _) => memory_stores(),
        };

        let (bus, local_bus): (Arc<dyn RealtimeBus>, Option<LocalBus>) =
            match config.realtime.provider {
                RealtimeProvider::Pusher => (
                    Arc::new(PusherBus::from_config(&config.realtime, http.clone())),
                    None,
                ),
                RealtimeProvider::Local => {
                    let local = LocalBus::new();
                    (Arc::new(local.clone()), Some(local))
                }
            };

        let relay = RelayService::new(
            message_store,
            bus,
            config.realtime.channel.clone(),
            config.realtime.event.clone(),
        );
        let signer = HmacGrantSigner::new(
            config.realtime.key.clone(),
            config.realtime.secret.clone(),
        );
        let push = NotificationDispatcher::new(
            push_store,
            Arc::new(HttpPushSender::new(http, config.push.ttl_seconds)),
        );

        Self {
            config,
            relay: Arc::new(relay),
            authenticator: Arc::new(ChannelAuthenticator::new(Arc::new(signer))),
            push: Arc::new(push),
            local_bus,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn local_bus(&self) -> Option<&LocalBus> {
        self.local_bus.as_ref()
    }
}
