//! Channel authenticator.
//!
//! Issues signed subscription grants for realtime channels. The signing
//! primitive is owned by the bus protocol and sits behind [`GrantSigner`];
//! this module only decides which identity claims go into the grant.

use std::sync::{Arc, LazyLock};

use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use shared::models::{
    ChannelGrant, ChannelGrantRequest, ChannelKind, ChannelStreamQuery, PresenceMember,
};
use thiserror::Error;
use tracing::{debug, instrument};

const MAX_CHANNEL_NAME_LEN: usize = 164;

static SOCKET_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+$").unwrap_or_else(|err| panic!("socket id pattern: {err}"))
});

static CHANNEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-a-zA-Z0-9_=@,.;]+$").unwrap_or_else(|err| panic!("channel pattern: {err}"))
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("missing required parameters: socket_id and channel_name are required")]
    MissingParameters,
    #[error("invalid {field}: {value}")]
    InvalidParameter { field: &'static str, value: String },
    #[error("presence channels require a user_id")]
    MissingIdentity,
    #[error("user_info is not valid JSON: {0}")]
    InvalidUserInfo(String),
    #[error("grant does not match the requested connection and channel")]
    InvalidGrant,
}

/// Hex HMAC-SHA256 of `message` under `secret`.
pub(crate) fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Signing primitive supplied by the realtime bus protocol.
pub trait GrantSigner: Send + Sync {
    fn sign(&self, to_sign: &str) -> String;
}

/// `key:hex(HMAC-SHA256(secret, to_sign))`, the hosted bus grant format.
#[derive(Clone)]
pub struct HmacGrantSigner {
    key: String,
    secret: String,
}

impl std::fmt::Debug for HmacGrantSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacGrantSigner")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl HmacGrantSigner {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl GrantSigner for HmacGrantSigner {
    fn sign(&self, to_sign: &str) -> String {
        let signature = hmac_sha256_hex(self.secret.as_bytes(), to_sign.as_bytes());
        format!("{}:{signature}", self.key)
    }
}

#[derive(Serialize)]
struct PresenceData<'a> {
    user_id: &'a str,
    user_info: Value,
}

/// A grant checked against the connection and channel it claims.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedGrant {
    pub socket_id: String,
    pub channel: String,
    /// The bound member; presence channels only.
    pub member: Option<PresenceMember>,
}

/// Validates grant requests and signs them.
#[derive(Clone)]
pub struct ChannelAuthenticator {
    signer: Arc<dyn GrantSigner>,
}

impl std::fmt::Debug for ChannelAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAuthenticator").finish_non_exhaustive()
    }
}

impl ChannelAuthenticator {
    pub fn new(signer: Arc<dyn GrantSigner>) -> Self {
        Self { signer }
    }

    /// Produces a grant scoped to one connection and one channel.
    ///
    /// Presence channels embed `{user_id, user_info}` as `channel_data`;
    /// other channels carry no identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError`] when the socket id or channel name is
    /// missing or malformed, or when a presence request lacks a usable
    /// identity. The signer is never called in those cases.
    #[instrument(
        name = "realtime.authorize",
        skip(self, request),
        fields(channel = request.channel_name.as_deref().unwrap_or_default()),
        err
    )]
    pub fn authorize(
        &self,
        request: &ChannelGrantRequest,
    ) -> Result<ChannelGrant, AuthorizationError> {
        let (socket_id, channel) = checked_target(
            request.socket_id.as_deref(),
            request.channel_name.as_deref(),
        )?;

        if !ChannelKind::of(channel).is_presence() {
            debug!("signing non-presence grant");
            return Ok(ChannelGrant {
                auth: self.signer.sign(&format!("{socket_id}:{channel}")),
                channel_data: None,
            });
        }

        let user_id =
            non_empty(request.user_id.as_deref()).ok_or(AuthorizationError::MissingIdentity)?;
        let user_info = match non_empty(request.user_info.as_deref()) {
            Some(raw) => serde_json::from_str::<Value>(raw)
                .map_err(|err| AuthorizationError::InvalidUserInfo(err.to_string()))?,
            None => Value::Object(serde_json::Map::new()),
        };

        let channel_data = serde_json::to_string(&PresenceData { user_id, user_info })
            .map_err(|err| AuthorizationError::InvalidUserInfo(err.to_string()))?;
        let auth = self
            .signer
            .sign(&format!("{socket_id}:{channel}:{channel_data}"));

        debug!(user_id, "signed presence grant");
        Ok(ChannelGrant {
            auth,
            channel_data: Some(channel_data),
        })
    }

    /// Checks a grant issued by [`Self::authorize`] before a subscription
    /// is opened with it, and returns the member it binds.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::authorize`] on missing or malformed parameters,
    /// with [`AuthorizationError::MissingIdentity`] when a presence grant
    /// has no `channel_data`, and with [`AuthorizationError::InvalidGrant`]
    /// when the signature does not match.
    #[instrument(
        name = "realtime.verify",
        skip(self, query),
        fields(channel = query.channel_name.as_deref().unwrap_or_default()),
        err
    )]
    pub fn verify(&self, query: &ChannelStreamQuery) -> Result<VerifiedGrant, AuthorizationError> {
        let (socket_id, channel) =
            checked_target(query.socket_id.as_deref(), query.channel_name.as_deref())?;
        let auth = non_empty(query.auth.as_deref()).ok_or(AuthorizationError::InvalidGrant)?;

        let channel_data = if ChannelKind::of(channel).is_presence() {
            Some(
                non_empty(query.channel_data.as_deref())
                    .ok_or(AuthorizationError::MissingIdentity)?,
            )
        } else {
            None
        };

        let to_sign = match channel_data {
            Some(data) => format!("{socket_id}:{channel}:{data}"),
            None => format!("{socket_id}:{channel}"),
        };
        if self.signer.sign(&to_sign) != auth {
            return Err(AuthorizationError::InvalidGrant);
        }

        let member = channel_data
            .map(serde_json::from_str::<PresenceMember>)
            .transpose()
            .map_err(|err| AuthorizationError::InvalidUserInfo(err.to_string()))?;

        Ok(VerifiedGrant {
            socket_id: socket_id.to_string(),
            channel: channel.to_string(),
            member,
        })
    }
}

/// Requires a well-formed socket id and channel name.
fn checked_target<'a>(
    socket_id: Option<&'a str>,
    channel: Option<&'a str>,
) -> Result<(&'a str, &'a str), AuthorizationError> {
    let (Some(socket_id), Some(channel)) = (non_empty(socket_id), non_empty(channel)) else {
        return Err(AuthorizationError::MissingParameters);
    };

    if !SOCKET_ID.is_match(socket_id) {
        return Err(AuthorizationError::InvalidParameter {
            field: "socket_id",
            value: socket_id.to_string(),
        });
    }
    if channel.len() > MAX_CHANNEL_NAME_LEN || !CHANNEL_NAME.is_match(channel) {
        return Err(AuthorizationError::InvalidParameter {
            field: "channel_name",
            value: channel.to_string(),
        });
    }
    Ok((socket_id, channel))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
