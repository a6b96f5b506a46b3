#![cfg_attr(not(test), forbid(unsafe_code))]

//! Command-line entry point for the Snackchat relay server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::{commands::spec::generate_spec, server::run};
use shared::config::server::Config;
use std::path::PathBuf;


/// Snackchat relay server and tools.
#[derive(Debug, Parser)]
#[command(name = "snackchat-server")]
#[command(about = "Chat relay, realtime grants and push notifications for Snackchat", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the relay server
    Serve {
        /// Port to bind, overriding the configuration file and `SNACKCHAT_PORT`
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (YAML, JSON or TOML). Profile defaults apply when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print or write the OpenAPI document
    Spec {
        /// `json`, `yaml`, or a file path. Defaults to YAML on stdout.
        output: Option<String>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved = Config::load_config(config, port).context("loading configuration")?;
    run(resolved).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
        Commands::Spec { output } => generate_spec(output.as_deref()),
    }
}
