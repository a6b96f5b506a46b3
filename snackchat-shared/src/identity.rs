//! Unauthenticated chat identity.
//!
//! A sender id is a locally generated UUID kept on the client; the display
//! name is whatever the user typed. Neither is ever verified: there is no
//! password, token or credential check anywhere in the chat flow, and
//! implementations of [`IdentityProvider`] must not add one.

use uuid::Uuid;

/// Source of the sender id and display name attached to outgoing messages.
pub trait IdentityProvider: Send + Sync {
    /// Stable, opaque per-client identifier.
    fn sender_id(&self) -> &str;

    /// User-chosen display name, if one has been entered.
    fn display_name(&self) -> Option<&str>;

    /// Replaces the display name. Names are not unique.
    fn set_display_name(&mut self, name: String);
}

/// Generates a fresh sender id.
#[must_use]
pub fn generate_sender_id() -> String {
    Uuid::new_v4().to_string()
}

/// In-memory identity, used by tests and short-lived sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    sender_id: String,
    display_name: Option<String>,
}

impl StaticIdentity {
    pub fn new(sender_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            display_name,
        }
    }

    /// Identity with a freshly generated sender id and no display name.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(generate_sender_id(), None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn sender_id(&self) -> &str {
        &self.sender_id
    }

    fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    fn set_display_name(&mut self, name: String) {
        self.display_name = Some(name);
    }
}
