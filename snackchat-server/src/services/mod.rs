//! Domain services behind the HTTP handlers.

pub mod authenticator;
pub mod message_store;
pub mod push;
pub mod realtime;
pub mod relay;

pub use authenticator::{
    AuthorizationError, ChannelAuthenticator, GrantSigner, HmacGrantSigner, VerifiedGrant,
};
pub use message_store::{MemoryMessageStore, MessageStore, PgMessageStore, StoreError};
pub use push::{NotificationDispatcher, PushError};
pub use realtime::{BusError, PusherBus, RealtimeBus};
pub use relay::{RelayError, RelayService};
