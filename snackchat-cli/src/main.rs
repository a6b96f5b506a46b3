//! Command-line client for Snackchat.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use server::server;
use shared::config::server::{Config, Profile};
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;
mod identity;
mod realtime_stream;
mod relay_client;

use commands::{
    chat::{ChatArgs, HistoryArgs, SendArgs},
    config::ConfigFormat,
    grant::GrantArgs,
};
use identity::FileIdentity;
use relay_client::HttpRelayClient;

/// Snackchat CLI
#[derive(Debug, Parser)]
#[command(name = "snackchat")]
#[command(about = "Command-line client for the Snackchat relay", long_about = None)]
struct Cli {
    /// Relay base URL; defaults to `server.public_base_url` from the configuration
    #[arg(long, global = true)]
    server: Option<Url>,

    /// Configuration file (YAML, JSON or TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Identity file; defaults to the platform config directory
    #[arg(long, global = true)]
    identity: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to bind, overriding the configuration
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Join the chat: type to send, channel traffic is printed live
    Chat(ChatArgs),
    /// Send a chat message
    Send(SendArgs),
    /// Show recent chat history, oldest first
    History(HistoryArgs),
    /// Delete messages older than the retention window
    Trim,
    /// Request a signed realtime channel grant
    Grant(GrantArgs),
    /// Show the local sender identity
    Whoami,
    /// Set the display name used for sending
    Nick {
        /// New display name
        name: String,
    },
    /// Generate a configuration file
    Config {
        #[arg(long, short, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,

        /// Profile whose defaults are written
        #[arg(long, default_value = "dev")]
        profile: Profile,

        /// Destination file; defaults to `config.<ext>` in the working directory
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Generate the OpenAPI specification
    Spec {
        /// `json`, `yaml`, or a file path
        output_path: Option<String>,
    },
    /// Generate shell completion scripts
    Completion {
        #[arg(long, short, value_enum)]
        shell: Shell,
    },
}

impl Cli {
    fn identity_path(&self) -> PathBuf {
        self.identity
            .clone()
            .unwrap_or_else(FileIdentity::default_path)
    }

    fn relay_client(&self) -> Result<HttpRelayClient> {
        let base = match &self.server {
            Some(url) => url.clone(),
            None => {
                Config::load_config(self.config.clone(), None)
                    .context("loading configuration")?
                    .server
                    .public_base_url
            }
        };
        HttpRelayClient::new(base)
    }
}

fn initialize_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Serve { .. }) {
        initialize_logging();
    }
    let identity_path = cli.identity_path();

    match &cli.command {
        Commands::Serve { port } => {
            let config = Config::load_config(cli.config.clone(), *port)
                .context("loading configuration")?;
            server::run(config).await?;
        }
        Commands::Chat(args) => {
            let client = cli.relay_client()?;
            commands::chat::chat(&client, &identity_path, args).await?;
        }
        Commands::Send(args) => {
            let client = cli.relay_client()?;
            commands::chat::send(&client, &identity_path, args).await?;
        }
        Commands::History(args) => {
            commands::chat::history(&cli.relay_client()?, args).await?;
        }
        Commands::Trim => commands::chat::trim(&cli.relay_client()?).await?,
        Commands::Grant(args) => {
            let client = cli.relay_client()?;
            commands::grant::grant(&client, &identity_path, args).await?;
        }
        Commands::Whoami => commands::identity::whoami(&identity_path)?,
        Commands::Nick { name } => commands::identity::nick(&identity_path, name)?,
        Commands::Config {
            format,
            profile,
            output,
        } => {
            commands::config::generate_config(*format, *profile, output.clone())?;
        }
        Commands::Spec { output_path } => {
            ::server::commands::spec::generate_spec(output_path.as_deref())?;
        }
        Commands::Completion { shell } => commands::completion::generate_completion(*shell),
    }

    Ok(())
}
