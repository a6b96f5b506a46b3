//! `chat`, `send`, `history` and `trim`.
//!
//! `chat` and `send` join the channel through the relay's event stream and
//! drive a [`ChatClient`]; `history` and `trim` are plain requests.

use std::{path::Path, sync::Arc};

use anyhow::{Result, bail};
use chrono::{Local, TimeZone};
use clap::Args;
use shared::{
    events::EventBus,
    identity::IdentityProvider,
    models::{CHAT_CHANNEL, ChatMessage, DEFAULT_HISTORY_LIMIT},
    realtime::RealtimeEvent,
    session::{ChatClient, ChatSession, RelayApi, SessionEvent, SessionState},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::{
    identity::FileIdentity, realtime_stream::SseBusConnection, relay_client::HttpRelayClient,
};

type LiveChat = ChatClient<HttpRelayClient, SseBusConnection>;

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Message text, sent as typed
    pub content: String,

    /// Display name for this message; defaults to the saved one
    #[arg(long, short)]
    pub nickname: Option<String>,

    /// Channel to send through
    #[arg(long, default_value = CHAT_CHANNEL)]
    pub channel: String,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Display name for this session; defaults to the saved one
    #[arg(long, short)]
    pub nickname: Option<String>,

    /// Messages of history to load on joining
    #[arg(long, short, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub limit: usize,

    /// Channel to join
    #[arg(long, default_value = CHAT_CHANNEL)]
    pub channel: String,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of messages to show
    #[arg(long, short, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub limit: usize,

    /// Print the messages as JSON
    #[arg(long)]
    pub json: bool,
}

/// The explicit nickname, else the saved one. Blank names count as unset.
fn resolve_nickname(explicit: Option<&str>, identity: &dyn IdentityProvider) -> Result<String> {
    let Some(nickname) = explicit
        .or_else(|| identity.display_name())
        .map(str::trim)
        .filter(|name| !name.is_empty())
    else {
        bail!("no display name set; run `snackchat nick <name>` or pass --nickname");
    };
    Ok(nickname.to_string())
}

/// Joins `channel` and waits for the subscription to be acknowledged.
///
/// The display name is resolved before any request is made.
async fn join(
    client: &HttpRelayClient,
    identity_path: &Path,
    nickname: Option<&str>,
    channel: &str,
    history_limit: usize,
    events: Arc<EventBus<SessionEvent>>,
) -> Result<LiveChat> {
    let identity = FileIdentity::load_or_create(identity_path)?;
    let nickname = resolve_nickname(nickname, &identity)?;

    let bus =
        SseBusConnection::open(client.clone(), channel, identity.sender_id(), &nickname).await?;
    let mut chat = ChatClient::new(client.clone(), bus, Box::new(identity), events)
        .with_history_limit(history_limit);
    chat.start(&nickname)?;

    loop {
        let Some(event) = chat.next_event().await else {
            bail!("chat channel closed before joining");
        };
        match &event {
            RealtimeEvent::SubscriptionError { reason } => {
                bail!("could not join {channel}: {reason}")
            }
            RealtimeEvent::ConnectionLost => bail!("connection lost while joining {channel}"),
            _ => {}
        }
        chat.handle(event).await?;
        if chat.session().state() == SessionState::Connected {
            info!(channel, socket_id = %chat.bus().socket_id(), "joined chat channel");
            return Ok(chat);
        }
    }
}

pub async fn send(client: &HttpRelayClient, identity_path: &Path, args: &SendArgs) -> Result<()> {
    if args.content.trim().is_empty() {
        bail!("message content must not be empty");
    }

    let mut chat = join(
        client,
        identity_path,
        args.nickname.as_deref(),
        &args.channel,
        1,
        Arc::new(EventBus::new()),
    )
    .await?;
    let message = chat.send(&args.content).await?;

    info!(message_id = %message.id, "message sent");
    println!("sent {}", message.id);
    Ok(())
}

enum Step {
    Bus(Option<RealtimeEvent>),
    Input(Option<String>),
}

/// Interactive session: typed lines are sent, channel traffic is printed.
///
/// Input is read only while connected. `/who` lists members, `/refresh`
/// reloads history and `/quit` (or end of input) leaves.
pub async fn chat(client: &HttpRelayClient, identity_path: &Path, args: &ChatArgs) -> Result<()> {
    let events = Arc::new(EventBus::new());
    events.subscribe(report_session_event);

    let mut chat = join(
        client,
        identity_path,
        args.nickname.as_deref(),
        &args.channel,
        args.limit,
        events,
    )
    .await?;

    let mut shown = print_new_lines(chat.session(), 0);
    let mut roster = roster_line(chat.session());
    eprintln!("{roster}");
    eprintln!("/who lists members, /refresh reloads history, /quit leaves");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let connected = chat.session().state() == SessionState::Connected;
        let step = tokio::select! {
            event = chat.next_event() => Step::Bus(event),
            line = input.next_line(), if connected => Step::Input(line?),
        };

        match step {
            Step::Bus(None) | Step::Input(None) => break,
            Step::Bus(Some(event)) => {
                if let Err(err) = chat.handle(event).await {
                    warn!(error = %err, "reconnect attempt failed");
                }
            }
            Step::Input(Some(line)) => match line.trim() {
                "" => {}
                "/quit" => break,
                "/who" => eprintln!("{}", roster_line(chat.session())),
                "/refresh" => {
                    chat.refresh_history().await;
                    shown = 0;
                }
                _ => {
                    if let Err(err) = chat.send(&line).await {
                        eprintln!("{err}");
                    }
                }
            },
        }

        shown = print_new_lines(chat.session(), shown);
        let current = roster_line(chat.session());
        if current != roster {
            eprintln!("{current}");
            roster = current;
        }
    }

    info!("left chat");
    Ok(())
}

fn report_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Notice(text) => eprintln!("! {text}"),
        SessionEvent::StateChanged(SessionState::Disconnected) => {
            eprintln!("! connection lost, reconnecting");
        }
        SessionEvent::StateChanged(SessionState::Connected) => eprintln!("! connected"),
        _ => {}
    }
}

/// Prints timeline entries from `shown` on and returns the new count.
fn print_new_lines(session: &ChatSession, shown: usize) -> usize {
    let messages = session.timeline().messages();
    for message in messages.iter().skip(shown) {
        println!("{}", format_line(message));
    }
    messages.len()
}

fn roster_line(session: &ChatSession) -> String {
    let mut names = session.roster().nicknames();
    names.sort_unstable();
    format!("here: {}", names.join(", "))
}

pub async fn history(client: &HttpRelayClient, args: &HistoryArgs) -> Result<()> {
    let messages = client.fetch_history(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("no messages");
    }
    for message in &messages {
        println!("{}", format_line(message));
    }
    Ok(())
}

pub async fn trim(client: &HttpRelayClient) -> Result<()> {
    client.trim().await?;
    println!("old messages deleted");
    Ok(())
}

fn format_line(message: &ChatMessage) -> String {
    let time = Local
        .timestamp_millis_opt(message.timestamp)
        .single()
        .map_or_else(|| "--:--:--".to_string(), |t| t.format("%H:%M:%S").to_string());
    format!("[{time}] {}: {}", message.nickname, message.content)
}
