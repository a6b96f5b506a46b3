//! `grant`: asks the server to sign a realtime subscription.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use shared::{
    identity::IdentityProvider,
    models::{CHAT_CHANNEL, ChannelGrantRequest, ChannelKind},
};

use crate::{identity::FileIdentity, relay_client::HttpRelayClient};

#[derive(Args, Debug)]
pub struct GrantArgs {
    /// Connection id assigned by the realtime bus
    #[arg(long)]
    pub socket_id: String,

    /// Channel to subscribe to
    #[arg(long, default_value = CHAT_CHANNEL)]
    pub channel: String,
}

/// Presence channels carry the local identity; other channels carry none.
pub fn build_request(args: &GrantArgs, identity: &dyn IdentityProvider) -> ChannelGrantRequest {
    let mut request = ChannelGrantRequest {
        socket_id: Some(args.socket_id.clone()),
        channel_name: Some(args.channel.clone()),
        ..ChannelGrantRequest::default()
    };

    if ChannelKind::of(&args.channel).is_presence() {
        request.user_id = Some(identity.sender_id().to_string());
        let nickname = identity.display_name().unwrap_or("anonymous");
        request.user_info = Some(json!({ "nickname": nickname }).to_string());
    }
    request
}

pub async fn grant(client: &HttpRelayClient, identity_path: &Path, args: &GrantArgs) -> Result<()> {
    let identity = FileIdentity::load_or_create(identity_path)?;
    let grant = client
        .request_grant(&build_request(args, &identity))
        .await?;
    println!("{}", serde_json::to_string_pretty(&grant)?);
    Ok(())
}
