use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

mod cli;
mod config;
mod gateway;

use crate::config::ParleyConfig;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Two-party chat over an ephemeral gateway or a persistent conversation store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.parley)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the development realtime gateway in the foreground
    Gateway(GatewayArgs),

    /// Chat through the realtime gateway (ephemeral)
    Session(SessionArgs),

    /// Chat in a persistent conversation on the local store
    Conversation(ConversationArgs),
}

#[derive(Parser)]
struct GatewayArgs {
    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Parser)]
struct SessionArgs {
    /// Session id to register under (default: random six digits)
    #[arg(long)]
    session_id: Option<String>,

    /// Initial recipient session id
    #[arg(long)]
    to: Option<String>,

    /// Gateway endpoint, overriding gateway.endpoint
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Parser)]
struct ConversationArgs {
    /// Conversation to open
    chat_id: String,

    /// Account to write as, overriding identity.account
    #[arg(long = "as", value_name = "IDENTITY")]
    identity: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let config = ParleyConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Gateway(args) => run_gateway(args, &config).await,
        Commands::Session(args) => {
            cli::session_command(&config, args.session_id, args.to, args.endpoint).await
        }
        Commands::Conversation(args) => {
            cli::conversation_command(&config, args.chat_id, args.identity).await
        }
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "parley=debug,parley_core=debug,tower_http=debug,info"
    } else {
        "parley=info,parley_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // stdout carries the chat transcript
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn run_gateway(args: GatewayArgs, config: &ParleyConfig) -> Result<()> {
    let server = &config.file.server;
    let host = args.host.unwrap_or_else(|| server.host.clone());
    let port = args.port.unwrap_or(server.port);

    info!("Starting Parley gateway");

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down gateway");
            shutdown.cancel();
        }
    });

    gateway::serve(listener, server.to_gateway_config(), cancel).await
}
